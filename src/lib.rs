//! Netfilter rule model with a parser for iptables rule specifications and
//! `iptables-save` dumps.
//!
//! # Example
//!
//! ```rust
//! use rnetfilter::{iptparser, Match, Rule};
//!
//! let mut rule = Rule::new();
//! rule.set_protocol(Some("tcp"))
//!   .set_destination(Some("10.0.0.1/32"))
//!   .push_match(Match::parse("tcp", "--destination-port 22").unwrap())
//!   .set_jump("ACCEPT");
//!
//! assert_eq!(rule.to_string(), "-p tcp -d 10.0.0.1 -m tcp --dport 22 -j ACCEPT");
//! assert_eq!(iptparser::parse_rule(&rule.to_string()).unwrap(), rule);
//! ```

use std::cell::RefCell;
use std::rc::Rc;

// Logs at a level chosen at runtime.
macro_rules! log_at {
  ($level:expr, $($arg:tt)+) => {{
    let level = $level;
    if level == tracing::Level::ERROR {
      tracing::error!($($arg)+);
    } else if level == tracing::Level::WARN {
      tracing::warn!($($arg)+);
    } else if level == tracing::Level::INFO {
      tracing::info!($($arg)+);
    } else if level == tracing::Level::DEBUG {
      tracing::debug!($($arg)+);
    } else {
      tracing::trace!($($arg)+);
    }
  }};
}

pub mod error;
pub mod firewall;
pub mod iptparser;
pub mod rule;
pub mod table;

pub use error::{RNFError, RNFParseError, RNFParseResult, RNFResult};
pub use firewall::{Firewall, FirewallCommand};
pub use iptparser::{parse_chains, parse_rule, parse_rules, ChainStats};
pub use rule::{Extension, Match, OptionValue, Rule, Target};
pub use table::{Table, TableOptions};

/// Executes commands on behalf of a `Table`.
///
/// `command` holds the program name followed by its arguments. Implementations
/// return the standard output of a successful run, and `RNFError::Command`
/// carrying the standard error otherwise.
pub trait CommandRunner {
  fn run(&mut self, command: &[String]) -> RNFResult<String>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &mut R {
  fn run(&mut self, command: &[String]) -> RNFResult<String> {
    (**self).run(command)
  }
}

/// Lets several tables issue their commands through one runner.
impl<R: CommandRunner + ?Sized> CommandRunner for Rc<RefCell<R>> {
  fn run(&mut self, command: &[String]) -> RNFResult<String> {
    self.borrow_mut().run(command)
  }
}
