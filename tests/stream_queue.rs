// tests/stream_queue.rs

use rzmq_loop::{
  BridgeConfig, MessageStream, Msg, PollEvents, RecvOptions, SendOptions, StreamConfig, ZmqError,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
mod common;

use common::{payloads, ManualReactor, StubSocket};

type Log = Rc<RefCell<Vec<String>>>;

/// A stream polled by a timer so every `fire_timers()` is exactly one readiness pass.
fn timer_stream(reactor: &ManualReactor, socket: &Rc<StubSocket>) -> MessageStream<StubSocket> {
  timer_stream_with(reactor, socket, StreamConfig::new())
}

fn timer_stream_with(reactor: &ManualReactor, socket: &Rc<StubSocket>, config: StreamConfig) -> MessageStream<StubSocket> {
  common::setup_tracing();
  let config = config.with_bridge(BridgeConfig::new().with_poll_interval(Duration::from_millis(5)));
  MessageStream::with_config(reactor.clone(), socket.clone(), config).unwrap()
}

fn log_completion(log: &Log, tag: &'static str) -> impl FnOnce(&MessageStream<StubSocket>, Vec<Msg>, Result<rzmq_loop::SendStatus, ZmqError>) + 'static {
  let log = log.clone();
  move |_stream, _frames, result| {
    let outcome = if result.is_ok() { "ok" } else { "err" };
    log.borrow_mut().push(format!("{}:{}", tag, outcome));
  }
}

fn collect_reads(log: &Log) -> impl FnMut(&MessageStream<StubSocket>, Result<Vec<Msg>, ZmqError>) + 'static {
  let log = log.clone();
  move |_stream, result| {
    let entry = match result {
      Ok(frames) => format!(
        "read:{}",
        payloads(&frames)
          .iter()
          .map(|f| String::from_utf8_lossy(f).into_owned())
          .collect::<Vec<_>>()
          .join("|")
      ),
      Err(e) => format!("error:{}", e),
    };
    log.borrow_mut().push(entry);
  }
}

#[test]
fn test_completions_fire_in_enqueue_order() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLOUT);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  stream.write_with("a", SendOptions::default(), log_completion(&log, "a")).unwrap();
  stream
    .write_multipart_with(vec!["b1", "b2"], SendOptions::default(), log_completion(&log, "b"))
    .unwrap();
  stream.write_with("c", SendOptions::default(), log_completion(&log, "c")).unwrap();
  assert_eq!(stream.queued(), 3);

  // One queued entry per writable notification.
  reactor.fire_timers();
  assert_eq!(*log.borrow(), vec!["a:ok"]);
  assert_eq!(stream.queued(), 2);

  reactor.fire_timers();
  reactor.fire_timers();
  assert_eq!(*log.borrow(), vec!["a:ok", "b:ok", "c:ok"]);
  assert_eq!(
    socket.sent(),
    vec![
      vec![b"a".to_vec()],
      vec![b"b1".to_vec(), b"b2".to_vec()],
      vec![b"c".to_vec()],
    ]
  );

  // Drained: writable interest is dropped so the idle stream stops polling.
  assert!(reactor.armed_timer_intervals().is_empty());
  stream.close().unwrap();
}

#[test]
fn test_write_re_enables_polling_after_drain() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLOUT);
  let stream = timer_stream(&reactor, &socket);

  stream.write("first").unwrap();
  reactor.fire_timers();
  assert!(reactor.armed_timer_intervals().is_empty());

  stream.write("second").unwrap();
  assert_eq!(reactor.armed_timer_intervals().len(), 1);
  reactor.fire_timers();
  assert_eq!(socket.sent(), vec![vec![b"first".to_vec()], vec![b"second".to_vec()]]);
}

#[test]
fn test_read_delivers_frames_once() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLIN);
  socket.push_inbound(&[b"hello", b"world"]);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  stream.start_read(collect_reads(&log), RecvOptions::default()).unwrap();
  reactor.fire_timers();
  reactor.fire_timers();
  assert_eq!(*log.borrow(), vec!["read:hello|world"]);
  assert!(stream.is_reading());
}

#[test]
fn test_would_block_on_receive_is_absorbed() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  // Readiness claims a message, the socket has none.
  socket.set_events(PollEvents::POLLIN);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();
  stream.start_read(collect_reads(&log), RecvOptions::default()).unwrap();

  reactor.fire_timers();
  assert!(log.borrow().is_empty());

  socket.push_inbound(&[b"late"]);
  reactor.fire_timers();
  assert_eq!(*log.borrow(), vec!["read:late"]);
}

#[test]
fn test_receive_errors_reach_the_read_callback() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLIN);
  socket.push_recv_error(ZmqError::InvalidState("out of phase"));
  socket.push_inbound(&[b"after"]);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();
  stream.start_read(collect_reads(&log), RecvOptions::default()).unwrap();

  reactor.fire_timers();
  reactor.fire_timers();
  let log = log.borrow();
  assert_eq!(log.len(), 2);
  assert!(log[0].starts_with("error:"));
  assert_eq!(log[1], "read:after");
  assert!(!stream.is_closed());
}

#[test]
fn test_read_happens_before_write_in_one_event() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLIN | PollEvents::POLLOUT);
  socket.push_inbound(&[b"reply"]);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  stream.write_with("request", SendOptions::default(), log_completion(&log, "write")).unwrap();
  stream.start_read(collect_reads(&log), RecvOptions::default()).unwrap();

  reactor.fire_timers();
  assert_eq!(*log.borrow(), vec!["read:reply", "write:ok"]);
}

#[test]
fn test_send_errors_complete_the_entry_and_continue() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLOUT);
  socket.fail_next_send(ZmqError::InvalidSocketType("SUB"));
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  stream.write_with("one", SendOptions::default(), log_completion(&log, "one")).unwrap();
  stream.write_with("two", SendOptions::default(), log_completion(&log, "two")).unwrap();
  reactor.fire_timers();
  reactor.fire_timers();

  assert_eq!(*log.borrow(), vec!["one:err", "two:ok"]);
  assert_eq!(socket.sent(), vec![vec![b"two".to_vec()]]);
}

#[test]
fn test_would_block_on_send_keeps_entry_at_head() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLOUT);
  socket.block_sends(true);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  stream.write_with("x", SendOptions::default(), log_completion(&log, "x")).unwrap();
  stream.write_with("y", SendOptions::default(), log_completion(&log, "y")).unwrap();
  reactor.fire_timers();
  assert!(log.borrow().is_empty());
  assert_eq!(stream.queued(), 2);

  socket.block_sends(false);
  reactor.fire_timers();
  reactor.fire_timers();
  assert_eq!(*log.borrow(), vec!["x:ok", "y:ok"]);
}

#[test]
fn test_flush_drains_synchronously() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  let stream = timer_stream(&reactor, &socket);

  stream.write("1").unwrap();
  stream.write("2").unwrap();
  stream.write_multipart(["3a", "3b"]).unwrap();
  stream.flush().unwrap();

  assert_eq!(stream.queued(), 0);
  assert_eq!(
    socket.sent(),
    vec![vec![b"1".to_vec()], vec![b"2".to_vec()], vec![b"3a".to_vec(), b"3b".to_vec()]]
  );
  assert!(reactor.armed_timer_intervals().is_empty());
}

#[test]
fn test_flush_without_capacity_leaves_queue_unchanged() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.block_sends(true);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  for tag in ["p", "q", "r"] {
    stream.write_with(tag, SendOptions::default(), log_completion(&log, tag)).unwrap();
  }
  stream.flush().unwrap();
  assert_eq!(stream.queued(), 3);
  assert!(log.borrow().is_empty());

  socket.block_sends(false);
  stream.flush().unwrap();
  assert_eq!(*log.borrow(), vec!["p:ok", "q:ok", "r:ok"]);
}

#[test]
fn test_flush_from_completion_callback_does_not_recurse() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  let inner_log = log.clone();
  stream
    .write_with("outer", SendOptions::default(), move |stream, _frames, _result| {
      stream.flush().unwrap();
      inner_log.borrow_mut().push(format!("queued:{}", stream.queued()));
    })
    .unwrap();
  stream.write("next").unwrap();
  stream.flush().unwrap();

  assert_eq!(*log.borrow(), vec!["queued:1"]);
  assert_eq!(stream.queued(), 0);
}

#[test]
fn test_stop_and_restart_preserve_state() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLIN | PollEvents::POLLOUT);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  stream.start_read(collect_reads(&log), RecvOptions::default()).unwrap();
  stream.stop().unwrap();
  stream.write("held").unwrap();
  socket.push_inbound(&[b"waiting"]);

  reactor.fire_timers();
  assert!(log.borrow().is_empty());
  assert!(socket.sent().is_empty());
  assert_eq!(stream.queued(), 1);
  assert!(stream.is_reading());

  stream.start().unwrap();
  reactor.fire_timers();
  assert_eq!(*log.borrow(), vec!["read:waiting"]);
  assert_eq!(socket.sent(), vec![vec![b"held".to_vec()]]);
}

#[test]
fn test_stop_read_keeps_writes_flowing() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLIN | PollEvents::POLLOUT);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  stream.start_read(collect_reads(&log), RecvOptions::default()).unwrap();
  stream.write("out").unwrap();
  stream.stop_read().unwrap();
  assert!(!stream.is_reading());
  socket.push_inbound(&[b"ignored"]);

  reactor.fire_timers();
  assert!(log.borrow().is_empty());
  assert_eq!(socket.sent(), vec![vec![b"out".to_vec()]]);
}

#[test]
fn test_start_read_replaces_callback() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLIN);
  let stream = timer_stream(&reactor, &socket);
  let first: Log = Rc::default();
  let second: Log = Rc::default();

  stream.start_read(collect_reads(&first), RecvOptions::default()).unwrap();
  stream
    .start_read(collect_reads(&second), RecvOptions { copy: false, track: false })
    .unwrap();
  socket.push_inbound(&[b"m"]);
  reactor.fire_timers();

  assert!(first.borrow().is_empty());
  assert_eq!(*second.borrow(), vec!["read:m"]);
}

#[test]
fn test_termination_is_forwarded_to_reader() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.fail_next_events(ZmqError::Terminated);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();
  stream.start_read(collect_reads(&log), RecvOptions::default()).unwrap();

  reactor.fire_timers();
  assert_eq!(*log.borrow(), vec![format!("error:{}", ZmqError::Terminated)]);
  assert_eq!(reactor.timer_count(), 0);
  assert!(stream.is_closed());
  assert!(matches!(stream.stop(), Err(ZmqError::Closed)));
  assert!(matches!(stream.start(), Err(ZmqError::Closed)));

  // The bridge is gone already; closing the stream still succeeds once.
  stream.close().unwrap();
  assert!(matches!(stream.close(), Err(ZmqError::Closed)));
}

#[test]
fn test_close_is_terminal_and_discards_queue() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLOUT);
  let stream = timer_stream(&reactor, &socket);
  let log: Log = Rc::default();

  stream.write_with("lost", SendOptions::default(), log_completion(&log, "lost")).unwrap();
  stream.close().unwrap();
  assert_eq!(stream.queued(), 0);
  assert_eq!(reactor.timer_count(), 0);

  reactor.fire_timers();
  assert!(log.borrow().is_empty());
  assert!(socket.sent().is_empty());

  assert!(matches!(stream.close(), Err(ZmqError::Closed)));
  assert!(matches!(stream.write("x"), Err(ZmqError::Closed)));
  assert!(matches!(stream.flush(), Err(ZmqError::Closed)));
  assert!(matches!(stream.stop(), Err(ZmqError::Closed)));
  assert!(matches!(stream.start(), Err(ZmqError::Closed)));
  assert!(matches!(stream.stop_read(), Err(ZmqError::Closed)));
  assert!(matches!(
    stream.start_read(|_, _| {}, RecvOptions::default()),
    Err(ZmqError::Closed)
  ));
  assert!(matches!(stream.bind("inproc://x"), Err(ZmqError::Closed)));
}

#[test]
fn test_close_from_read_callback() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.set_events(PollEvents::POLLIN);
  socket.push_inbound(&[b"one"]);
  socket.push_inbound(&[b"two"]);
  let stream = timer_stream(&reactor, &socket);
  let count = Rc::new(RefCell::new(0));
  let counter = count.clone();
  stream
    .start_read(
      move |stream, _result| {
        *counter.borrow_mut() += 1;
        stream.close().unwrap();
      },
      RecvOptions::default(),
    )
    .unwrap();

  reactor.fire_timers();
  reactor.fire_timers();
  assert_eq!(*count.borrow(), 1);
  assert!(stream.is_closed());
}

#[test]
fn test_bounded_queue_rejects_writes() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  socket.block_sends(true);
  let stream = timer_stream_with(&reactor, &socket, StreamConfig::new().with_max_queued(2));

  stream.write("1").unwrap();
  stream.write("2").unwrap();
  assert!(matches!(stream.write("3"), Err(ZmqError::ResourceLimitReached)));
  assert_eq!(stream.queued(), 2);
}

#[test]
fn test_empty_multipart_is_rejected() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  let stream = timer_stream(&reactor, &socket);
  assert!(matches!(
    stream.write_multipart(Vec::<Msg>::new()),
    Err(ZmqError::InvalidArgument(_))
  ));
  assert_eq!(stream.queued(), 0);
}

#[test]
fn test_pass_through_options() {
  let reactor = ManualReactor::new();
  let socket = StubSocket::new();
  let stream = timer_stream(&reactor, &socket);
  assert!(stream.connect("inproc://anything").is_ok());
  assert!(matches!(stream.get_option(16), Err(ZmqError::InvalidOption(16))));
  assert!(Rc::ptr_eq(stream.socket(), &socket));
}
