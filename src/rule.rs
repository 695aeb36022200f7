use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use indexmap::IndexMap;
use tracing::Level;

use crate::error::{RNFError, RNFParseError, RNFParseResult, RNFResult};
use crate::iptparser;

/// Marker placed in front of an option or value to invert it.
pub const NEGATION: &str = "!";

/// Value stored under an extension option.
///
/// Parsing always produces `List`; `Single` is accepted for options inserted
/// by hand and is serialized as one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
  List(Vec<String>),
  Single(String),
}

impl OptionValue {
  fn extend_bits(&self, bits: &mut Vec<String>) {
    match self {
      OptionValue::List(values) => bits.extend(values.iter().cloned()),
      OptionValue::Single(value) => bits.push(value.clone()),
    }
  }
}

impl From<Vec<String>> for OptionValue {
  fn from(values: Vec<String>) -> Self {
    OptionValue::List(values)
  }
}

impl From<String> for OptionValue {
  fn from(value: String) -> Self {
    OptionValue::Single(value)
  }
}

impl From<&str> for OptionValue {
  fn from(value: &str) -> Self {
    OptionValue::Single(value.to_string())
  }
}

/// Kind of an extension, deciding how option spellings are canonicalized.
pub trait ExtensionKind {
  /// Pairs of (accepted spelling, canonical spelling).
  const REWRITE_OPTIONS: &'static [(&'static str, &'static str)];

  fn canonical_option(name: &str) -> &str {
    Self::REWRITE_OPTIONS.iter()
      .find(|(from, _)| *from == name)
      .map(|(_, to)| *to)
      .unwrap_or(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetKind;

impl ExtensionKind for MatchKind {
  const REWRITE_OPTIONS: &'static [(&'static str, &'static str)] = &[
    ("destination-port", "dport"),
    ("destination-ports", "dports"),
    ("source-port", "sport"),
    ("source-ports", "sports"),
  ];
}

impl ExtensionKind for TargetKind {
  const REWRITE_OPTIONS: &'static [(&'static str, &'static str)] = &[];
}

/// A named match or target module together with its options.
#[derive(Debug, Clone)]
pub struct Extension<K> {
  name: String,
  options: IndexMap<String, OptionValue>,
  kind: PhantomData<K>,
}

/// A match extension, for instance `multiport`.
pub type Match = Extension<MatchKind>;

/// A target extension, used by the `jump` and `goto` of a rule.
pub type Target = Extension<TargetKind>;

impl<K: ExtensionKind> Extension<K> {
  /// Extension without options.
  pub fn new<S: Into<String>>(name: S) -> Self {
    Extension {
      name: name.into(),
      options: IndexMap::new(),
      kind: PhantomData,
    }
  }

  /// Builds an extension from a raw option string such as `--dport 80 --sport 22`.
  pub fn parse<S: Into<String>>(name: S, options: &str) -> RNFParseResult<Self> {
    Self::from_bits(name, &iptparser::split_words(options))
  }

  /// Builds an extension from already split option tokens.
  pub fn from_bits<S: Into<String>, B: AsRef<str>>(name: S, bits: &[B]) -> RNFParseResult<Self> {
    let mut extension = Self::new(name);
    extension.parse_options(bits)?;
    Ok(extension)
  }

  fn parse_options<B: AsRef<str>>(&mut self, bits: &[B]) -> RNFParseResult<()> {
    let mut pos = 0;
    let mut current = vec![];
    while pos < bits.len() {
      let bit = bits[pos].as_ref();
      if bit == NEGATION {
        current.push(NEGATION);
        pos += 1;
        continue;
      }

      let option = self::option_name(bit)
        .ok_or_else(|| RNFParseError::UnrecognizedOption(bit.to_string()))?;
      pos += 1;
      current.push(K::canonical_option(option));

      let mut values = vec![];
      while pos < bits.len() && !self::starts_option(bits, pos) {
        values.push(bits[pos].as_ref().to_string());
        pos += 1;
      }

      // a repeated option keeps its first position but takes the new values
      self.options.insert(current.join(" "), OptionValue::List(values));
      current.clear();
    }
    Ok(())
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn options(&self) -> &IndexMap<String, OptionValue> {
    &self.options
  }

  pub fn option(&self, key: &str) -> Option<&OptionValue> {
    self.options.get(key)
  }

  /// Stores `value` under `key` as is, without canonicalizing the key.
  /// Prefix the key with `"! "` for a negated option.
  pub fn insert_option<S: Into<String>, V: Into<OptionValue>>(&mut self, key: S, value: V) -> &mut Self {
    self.options.insert(key.into(), value.into());
    self
  }

  /// Returns the arguments that would be given to iptables for this extension.
  /// Options are emitted sorted by key.
  pub fn specbits(&self) -> Vec<String> {
    let mut keys: Vec<&String> = self.options.keys().collect();
    keys.sort();

    let mut bits = vec![];
    for key in keys {
      match key.strip_prefix("! ") {
        Some(negated) => {
          bits.push(NEGATION.to_string());
          bits.push(format!("--{}", negated));
        }
        None => bits.push(format!("--{}", key)),
      }
      self.options[key.as_str()].extend_bits(&mut bits);
    }
    bits
  }

  /// Writes the contents of the extension to the logging system.
  pub fn log(&self, level: Level, prefix: &str) {
    log_at!(level, "{}name: {}", prefix, self.name);
    log_at!(level, "{}options: {:?}", prefix, self.options);
  }
}

impl<K, L> PartialEq<Extension<L>> for Extension<K> {
  fn eq(&self, other: &Extension<L>) -> bool {
    self.name == other.name && self.options == other.options
  }
}

impl<K> Eq for Extension<K> {}

impl<K: ExtensionKind> From<&str> for Extension<K> {
  fn from(name: &str) -> Self {
    Extension::new(name)
  }
}

impl<K: ExtensionKind> From<String> for Extension<K> {
  fn from(name: String) -> Self {
    Extension::new(name)
  }
}

fn option_name(bit: &str) -> Option<&str> {
  bit.strip_prefix("--")
}

// An option flag, or a negation directly in front of one.
fn starts_option<B: AsRef<str>>(bits: &[B], pos: usize) -> bool {
  let bit = bits[pos].as_ref();
  if bit == NEGATION {
    return bits.get(pos + 1).map_or(false, |next| self::option_name(next.as_ref()).is_some());
  }
  self::option_name(bit).is_some()
}

/// An iptables rule.
///
/// Host and interface fields hold an optional `"! "` prefix for negation.
/// Writes go through setters so that `source`/`destination` are always
/// stored in canonical form.
#[derive(Debug, Clone, Default)]
pub struct Rule {
  protocol: Option<String>,
  source: Option<String>,
  destination: Option<String>,
  in_interface: Option<String>,
  out_interface: Option<String>,
  matches: Vec<Match>,
  goto: Option<Target>,
  jump: Option<Target>,
  packets: u64,
  bytes: u64,
}

impl Rule {
  pub fn new() -> Self {
    Rule::default()
  }

  pub fn protocol(&self) -> Option<&str> {
    self.protocol.as_deref()
  }

  pub fn source(&self) -> Option<&str> {
    self.source.as_deref()
  }

  pub fn destination(&self) -> Option<&str> {
    self.destination.as_deref()
  }

  pub fn in_interface(&self) -> Option<&str> {
    self.in_interface.as_deref()
  }

  pub fn out_interface(&self) -> Option<&str> {
    self.out_interface.as_deref()
  }

  pub fn matches(&self) -> &[Match] {
    &self.matches
  }

  pub fn goto(&self) -> Option<&Target> {
    self.goto.as_ref()
  }

  pub fn jump(&self) -> Option<&Target> {
    self.jump.as_ref()
  }

  pub fn packets(&self) -> u64 {
    self.packets
  }

  pub fn bytes(&self) -> u64 {
    self.bytes
  }

  pub fn set_protocol(&mut self, protocol: Option<&str>) -> &mut Self {
    self.protocol = protocol.map(str::to_string);
    self
  }

  /// A trailing `/32` host mask is dropped.
  pub fn set_source(&mut self, source: Option<&str>) -> &mut Self {
    self.source = source.map(self::canonical_host);
    self
  }

  /// A trailing `/32` host mask is dropped.
  pub fn set_destination(&mut self, destination: Option<&str>) -> &mut Self {
    self.destination = destination.map(self::canonical_host);
    self
  }

  pub fn set_in_interface(&mut self, interface: Option<&str>) -> &mut Self {
    self.in_interface = interface.map(str::to_string);
    self
  }

  pub fn set_out_interface(&mut self, interface: Option<&str>) -> &mut Self {
    self.out_interface = interface.map(str::to_string);
    self
  }

  pub fn set_matches(&mut self, matches: Vec<Match>) -> &mut Self {
    self.matches = matches;
    self
  }

  pub fn push_match(&mut self, m: Match) -> &mut Self {
    self.matches.push(m);
    self
  }

  /// Accepts a `Target` or a bare target name.
  ///
  /// Setting `goto` leaves any `jump` in place; `specbits` prefers `goto`.
  pub fn set_goto<T: Into<Target>>(&mut self, target: T) -> &mut Self {
    self.goto = Some(target.into());
    self
  }

  pub fn clear_goto(&mut self) -> &mut Self {
    self.goto = None;
    self
  }

  /// Accepts a `Target` or a bare target name.
  pub fn set_jump<T: Into<Target>>(&mut self, target: T) -> &mut Self {
    self.jump = Some(target.into());
    self
  }

  pub fn clear_jump(&mut self) -> &mut Self {
    self.jump = None;
    self
  }

  pub fn set_counters(&mut self, packets: u64, bytes: u64) -> &mut Self {
    self.packets = packets;
    self.bytes = bytes;
    self
  }

  /// Keyword-style write of a single field, routed through the setters.
  ///
  /// `matches` cannot be written from a scalar and unknown fields are rejected.
  pub fn assign(&mut self, field: &str, value: &str) -> RNFResult<&mut Self> {
    match field {
      "protocol" => {
        self.set_protocol(Some(value));
      }
      "source" => {
        self.set_source(Some(value));
      }
      "destination" => {
        self.set_destination(Some(value));
      }
      "in_interface" => {
        self.set_in_interface(Some(value));
      }
      "out_interface" => {
        self.set_out_interface(Some(value));
      }
      "goto" => {
        self.set_goto(value);
      }
      "jump" => {
        self.set_jump(value);
      }
      "packets" => self.packets = self::parse_counter(field, value)?,
      "bytes" => self.bytes = self::parse_counter(field, value)?,
      "matches" => return Err(RNFError::InvalidField {
        field: field.to_string(),
        message: "matches attribute requires a list".to_string(),
      }),
      _ => return Err(RNFError::InvalidField {
        field: field.to_string(),
        message: "no such rule attribute".to_string(),
      }),
    }
    Ok(self)
  }

  /// Finds the first rule in `rules` equal to this one.
  pub fn find<'a>(&self, rules: &'a [Rule]) -> Option<&'a Rule> {
    rules.iter().find(|rule| *rule == self)
  }

  /// Returns the arguments that would be given to iptables for this rule.
  pub fn specbits(&self) -> Vec<String> {
    let mut bits = vec![];
    self::host_bits(&mut bits, "-p", &self.protocol);
    self::host_bits(&mut bits, "-i", &self.in_interface);
    self::host_bits(&mut bits, "-o", &self.out_interface);
    self::host_bits(&mut bits, "-s", &self.source);
    self::host_bits(&mut bits, "-d", &self.destination);
    for m in &self.matches {
      bits.push("-m".to_string());
      bits.push(m.name().to_string());
      bits.extend(m.specbits());
    }
    if let Some(goto) = &self.goto {
      bits.push("-g".to_string());
      bits.push(goto.name().to_string());
      bits.extend(goto.specbits());
    } else if let Some(jump) = &self.jump {
      bits.push("-j".to_string());
      bits.push(jump.name().to_string());
      bits.extend(jump.specbits());
    }
    bits
  }

  /// Writes the contents of the rule to the logging system.
  pub fn log(&self, level: Level, prefix: &str) {
    log_at!(level, "{}protocol: {:?}", prefix, self.protocol);
    log_at!(level, "{}in interface: {:?}", prefix, self.in_interface);
    log_at!(level, "{}out interface: {:?}", prefix, self.out_interface);
    log_at!(level, "{}source: {:?}", prefix, self.source);
    log_at!(level, "{}destination: {:?}", prefix, self.destination);
    log_at!(level, "{}matches:", prefix);
    let nested = format!("{}  ", prefix);
    for m in &self.matches {
      m.log(level, &nested);
    }
    if let Some(goto) = &self.goto {
      log_at!(level, "{}goto:", prefix);
      goto.log(level, &nested);
    }
    if let Some(jump) = &self.jump {
      log_at!(level, "{}jump:", prefix);
      jump.log(level, &nested);
    }
  }
}

// counters are not part of a rule's identity
impl PartialEq for Rule {
  fn eq(&self, other: &Rule) -> bool {
    self.protocol == other.protocol
      && self.in_interface == other.in_interface
      && self.out_interface == other.out_interface
      && self.source == other.source
      && self.destination == other.destination
      && self.goto == other.goto
      && self.jump == other.jump
      && self.matches == other.matches
  }
}

impl Eq for Rule {}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", iptparser::format_spec(&self.specbits()))
  }
}

impl FromStr for Rule {
  type Err = RNFParseError;

  fn from_str(spec: &str) -> Result<Self, Self::Err> {
    iptparser::parse_rule(spec)
  }
}

// Only the /32 host mask is folded away, other netmasks are kept verbatim.
fn canonical_host(value: &str) -> String {
  value.strip_suffix("/32").unwrap_or(value).to_string()
}

fn host_bits(bits: &mut Vec<String>, flag: &str, value: &Option<String>) {
  let value = match value {
    Some(value) if !value.is_empty() => value,
    _ => return,
  };
  match value.strip_prefix(NEGATION) {
    Some(negated) => {
      bits.push(NEGATION.to_string());
      bits.push(flag.to_string());
      bits.push(negated.trim_start().to_string());
    }
    None => {
      bits.push(flag.to_string());
      bits.push(value.clone());
    }
  }
}

fn parse_counter(field: &str, value: &str) -> RNFResult<u64> {
  value.parse::<u64>().map_err(|err| RNFError::InvalidField {
    field: field.to_string(),
    message: err.to_string(),
  })
}
