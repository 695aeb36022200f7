use tracing::{debug, warn};

use crate::error::{RNFError, RNFResult};
use crate::iptparser;
use crate::rule::Rule;
use crate::CommandRunner;

const CHAIN_EXISTS: &[&str] = &[
  "iptables: Chain already exists",
  "ip6tables: Chain already exists",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
  /// Use ip6tables and ip6tables-save instead of iptables and iptables-save.
  pub ipv6: bool,

  /// Run state-changing commands immediately instead of buffering them
  /// until `commit`.
  pub auto_commit: bool,

  /// Whether to pass `--wait`. `None` checks once whether the command supports it.
  pub wait: Option<bool>,
}

impl Default for TableOptions {
  fn default() -> Self {
    TableOptions {
      ipv6: false,
      auto_commit: true,
      wait: None,
    }
  }
}

/// A netfilter table (IPv4 or IPv6).
///
/// Commands are handed to the `CommandRunner`; queries read the table back
/// through an `iptables-save -c` dump.
pub struct Table<R> {
  name: String,
  options: TableOptions,
  runner: R,
  buffer: Vec<Vec<String>>,
}

impl<R: CommandRunner> Table<R> {
  pub fn new<S: Into<String>>(name: S, options: TableOptions, runner: R) -> Table<R> {
    Table {
      name: name.into(),
      options,
      runner,
      buffer: vec![],
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn options(&self) -> &TableOptions {
    &self.options
  }

  pub fn set_auto_commit(&mut self, auto_commit: bool) {
    self.options.auto_commit = auto_commit;
  }

  /// Creates the specified user-defined chain.
  ///
  /// # Example
  ///
  /// ```rust
  /// use rnetfilter::{CommandRunner, RNFResult, Table, TableOptions};
  ///
  /// struct Echo;
  ///
  /// impl CommandRunner for Echo {
  ///   fn run(&mut self, command: &[String]) -> RNFResult<String> {
  ///     println!("{}", command.join(" "));
  ///     Ok(String::new())
  ///   }
  /// }
  ///
  /// let options = TableOptions { wait: Some(false), ..TableOptions::default() };
  /// let mut table = Table::new("filter", options, Echo);
  /// table.create_chain("ssh-in").unwrap();
  /// ```
  pub fn create_chain(&mut self, chain: &str) -> RNFResult<()> {
    self.run_iptables(vec!["-N".to_string(), chain.to_string()])
  }

  /// Deletes the specified user-defined chain, or every user-defined chain
  /// of the table when `chain` is `None`.
  pub fn delete_chain(&mut self, chain: Option<&str>) -> RNFResult<()> {
    let mut args = vec!["-X".to_string()];
    args.extend(chain.map(str::to_string));
    self.run_iptables(args)
  }

  /// Deletes all the rules of the specified chain, or of every chain of the
  /// table when `chain` is `None`.
  pub fn flush_chain(&mut self, chain: Option<&str>) -> RNFResult<()> {
    let mut args = vec!["-F".to_string()];
    args.extend(chain.map(str::to_string));
    self.run_iptables(args)
  }

  pub fn rename_chain(&mut self, old_chain: &str, new_chain: &str) -> RNFResult<()> {
    self.run_iptables(vec!["-E".to_string(), old_chain.to_string(), new_chain.to_string()])
  }

  /// Lists the chain names of the table in dump order.
  pub fn list_chains(&mut self) -> RNFResult<Vec<String>> {
    let data = self.save()?;
    Ok(iptparser::parse_chains(&data).into_iter().map(|(name, _)| name).collect())
  }

  /// Gets the policy of a built-in chain. User-defined chains have none.
  pub fn get_policy(&mut self, chain: &str) -> RNFResult<Option<String>> {
    let data = self.save()?;
    iptparser::parse_chains(&data)
      .swap_remove(chain)
      .map(|stats| stats.policy)
      .ok_or_else(|| RNFError::UnknownChain(chain.to_string()))
  }

  pub fn set_policy(&mut self, chain: &str, policy: &str) -> RNFResult<()> {
    self.run_iptables(vec!["-P".to_string(), chain.to_string(), policy.to_string()])
  }

  pub fn append_rule(&mut self, chain: &str, rule: &Rule) -> RNFResult<()> {
    let mut args = vec!["-A".to_string(), chain.to_string()];
    args.extend(rule.specbits());
    self.run_iptables(args)
  }

  pub fn delete_rule(&mut self, chain: &str, rule: &Rule) -> RNFResult<()> {
    let mut args = vec!["-D".to_string(), chain.to_string()];
    args.extend(rule.specbits());
    self.run_iptables(args)
  }

  /// Inserts `rule` at the head of the chain.
  pub fn prepend_rule(&mut self, chain: &str, rule: &Rule) -> RNFResult<()> {
    let mut args = vec!["-I".to_string(), chain.to_string(), "1".to_string()];
    args.extend(rule.specbits());
    self.run_iptables(args)
  }

  /// Lists the rules of the chain with their packet and byte counters.
  pub fn list_rules(&mut self, chain: &str) -> RNFResult<Vec<Rule>> {
    let data = self.save()?;
    Ok(iptparser::parse_rules(&data, chain)?)
  }

  /// Runs the buffered commands in order. On failure the failing command and
  /// the ones after it stay in the buffer.
  pub fn commit(&mut self) -> RNFResult<()> {
    while !self.buffer.is_empty() {
      let command = self.buffer[0].clone();
      self.run(&command)?;
      self.buffer.remove(0);
    }
    Ok(())
  }

  /// Commands waiting for `commit`.
  pub fn buffer(&self) -> &[Vec<String>] {
    &self.buffer
  }

  fn iptables(&self) -> &'static str {
    if self.options.ipv6 { "ip6tables" } else { "iptables" }
  }

  fn iptables_save(&self) -> &'static str {
    if self.options.ipv6 { "ip6tables-save" } else { "iptables-save" }
  }

  fn save(&mut self) -> RNFResult<String> {
    let command = vec![
      self.iptables_save().to_string(),
      "-t".to_string(),
      self.name.clone(),
      "-c".to_string(),
    ];
    self.run(&command)
  }

  fn has_wait(&mut self) -> bool {
    if let Some(wait) = self.options.wait {
      return wait;
    }
    let check = vec![
      self.iptables().to_string(),
      "-L".to_string(),
      "-n".to_string(),
      "--wait".to_string(),
    ];
    let wait = self.run(&check).is_ok();
    debug!("{} --wait supported: {}", self.iptables(), wait);
    self.options.wait = Some(wait);
    wait
  }

  fn run_iptables(&mut self, args: Vec<String>) -> RNFResult<()> {
    let mut command = vec![self.iptables().to_string()];
    if self.has_wait() {
      command.push("--wait".to_string());
    }
    command.push("-t".to_string());
    command.push(self.name.clone());
    command.extend(args);

    if self.options.auto_commit {
      self.run(&command)?;
    } else {
      debug!("buffering: {}", command.join(" "));
      self.buffer.push(command);
    }
    Ok(())
  }

  fn run(&mut self, command: &[String]) -> RNFResult<String> {
    debug!("running: {}", command.join(" "));
    match self.runner.run(command) {
      Err(RNFError::Command { ref message, .. }) if self::chain_exists(message) => {
        warn!("ignoring failure of '{}': {}", command.join(" "), message.trim_end());
        Ok(String::new())
      }
      result => result,
    }
  }
}

fn chain_exists(message: &str) -> bool {
  CHAIN_EXISTS.iter().any(|prefix| message.starts_with(prefix))
}
