use thiserror::Error;

#[derive(Debug, Error)]
pub enum RNFError {
  #[error("{0}")]
  Parse(#[from] RNFParseError),

  /// A keyword-style write to a rule field was rejected
  #[error("invalid value for '{field}': {message}")]
  InvalidField { field: String, message: String },

  /// A command handed to a `CommandRunner` failed
  #[error("command: {}\nmessage: {message}", .command.join(" "))]
  Command { command: Vec<String>, message: String },

  #[error("no such chain: {0}")]
  UnknownChain(String),

  #[error("unknown firewall command: {0}")]
  UnknownCommand(String),
}

/// Defines the Result type of rnetfilter crate
pub type RNFResult<T> = Result<T, RNFError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RNFParseError {
  /// An extension option list held a value where an option flag belongs
  #[error("expected option, got: {0}")]
  UnrecognizedOption(String),

  #[error("unhandled option '{flag}' in rule '{spec}'")]
  UnhandledRuleFlag { flag: String, spec: String },

  /// The flag was the last token of the rule
  #[error("missing value for '{flag}' in rule '{spec}'")]
  MissingValue { flag: String, spec: String },
}

pub type RNFParseResult<T> = Result<T, RNFParseError>;
