#![allow(dead_code)]

use std::collections::VecDeque;

use rnetfilter::{CommandRunner, RNFError, RNFResult, TableOptions};

/// Records every command and answers with queued replies, `Ok("")` once
/// the queue runs dry.
#[derive(Default)]
pub struct Recorder {
  pub commands: Vec<Vec<String>>,
  pub replies: VecDeque<RNFResult<String>>,
}

impl Recorder {
  pub fn reply(mut self, reply: RNFResult<String>) -> Self {
    self.replies.push_back(reply);
    self
  }

  pub fn lines(&self) -> Vec<String> {
    self.commands.iter().map(|command| command.join(" ")).collect()
  }
}

impl CommandRunner for Recorder {
  fn run(&mut self, command: &[String]) -> RNFResult<String> {
    self.commands.push(command.to_vec());
    self.replies.pop_front().unwrap_or_else(|| Ok(String::new()))
  }
}

pub fn failure(message: &str) -> RNFResult<String> {
  Err(RNFError::Command { command: vec![], message: message.to_string() })
}

pub fn no_wait() -> TableOptions {
  TableOptions { wait: Some(false), ..TableOptions::default() }
}
