// src/socket/patterns/mod.rs

mod trie;

pub(crate) use trie::SubscriptionTrie;
