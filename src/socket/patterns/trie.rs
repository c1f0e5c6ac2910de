// src/socket/patterns/trie.rs

use std::collections::HashMap;

/// A node in the subscription trie.
#[derive(Debug, Default)]
struct TrieNode {
  children: HashMap<u8, TrieNode>,
  /// Count of subscriptions ending exactly at this node.
  count: usize,
}

impl TrieNode {
  fn is_unused(&self) -> bool {
    self.count == 0 && self.children.is_empty()
  }
}

/// Manages topic subscriptions using a prefix trie for efficient matching.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTrie {
  root: TrieNode,
}

impl SubscriptionTrie {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a subscription topic (prefix).
  /// Increments the count if the topic already exists.
  pub fn subscribe(&mut self, topic: &[u8]) {
    let mut node = &mut self.root;
    for &byte in topic {
      node = node.children.entry(byte).or_default();
    }
    node.count += 1;
    tracing::debug!(topic = ?String::from_utf8_lossy(topic), "Subscribed");
  }

  /// Removes a subscription topic (prefix).
  /// Returns true if the topic existed and its count reached zero.
  pub fn unsubscribe(&mut self, topic: &[u8]) -> bool {
    match Self::remove(&mut self.root, topic) {
      Some(last) => {
        tracing::debug!(topic = ?String::from_utf8_lossy(topic), "Unsubscribed");
        last
      }
      None => {
        tracing::debug!(topic = ?String::from_utf8_lossy(topic), "Unsubscribe failed: Topic prefix not found");
        false
      }
    }
  }

  // Walks down recursively so emptied branches are pruned on the way back up.
  fn remove(node: &mut TrieNode, topic: &[u8]) -> Option<bool> {
    match topic.split_first() {
      None => {
        if node.count == 0 {
          return None;
        }
        node.count -= 1;
        Some(node.count == 0)
      }
      Some((byte, rest)) => {
        let child = node.children.get_mut(byte)?;
        let result = Self::remove(child, rest);
        if child.is_unused() {
          node.children.remove(byte);
        }
        result
      }
    }
  }

  /// Checks if a given message topic matches *any* active subscription prefix.
  pub fn matches(&self, message_topic: &[u8]) -> bool {
    let mut node = &self.root;
    if node.count > 0 {
      return true; // Matches empty subscription
    }
    for byte in message_topic {
      match node.children.get(byte) {
        Some(next) => node = next,
        None => return false,
      }
      if node.count > 0 {
        return true;
      }
    }
    false
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.root.is_unused()
  }
}
