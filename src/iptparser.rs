use indexmap::IndexMap;
use text_reader::TextReader;
use tracing::trace;

use crate::error::{RNFParseError, RNFParseResult};
use crate::rule::{Match, Rule, Target, NEGATION};

/// Policy and counters of a chain, as listed in an iptables-save dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStats {
  /// `None` for user-defined chains, which the dump shows as `-`.
  pub policy: Option<String>,
  pub packets: u64,
  pub bytes: u64,
}

/// Splits a rule specification into words.
/// A double-quoted segment forms a single word, without its quotes.
pub fn split_words(line: &str) -> Vec<String> {
  if line.contains('"') {
    self::split_quoted(line)
  } else {
    line.split_whitespace().map(str::to_string).collect()
  }
}

// Unbalanced quotes are not an error, the dangling quote just starts a plain word.
fn split_quoted(line: &str) -> Vec<String> {
  let mut words = vec![];
  let mut reader = TextReader::new(line.to_string());
  while reader.has_next() {
    match reader.next() {
      Some('"') => {
        let mut quoted = String::new();
        let mut closed = false;
        while reader.has_next() {
          match reader.next() {
            Some('"') => {
              closed = true;
              break;
            }
            Some(ch) => quoted.push(ch),
            None => break,
          }
        }
        if closed {
          words.push(quoted);
          continue;
        }
        // no quote left on the line, fall back to whitespace splitting
        let rest = format!("\"{}", quoted);
        words.extend(rest.split_whitespace().map(self::unquote));
      }
      Some(ch) if ch.is_whitespace() => {}
      Some(ch) => {
        let mut word = ch.to_string();
        while reader.has_next() {
          match reader.next() {
            Some(ch) if ch.is_whitespace() => break,
            Some(ch) => word.push(ch),
            None => break,
          }
        }
        words.push(word);
      }
      None => break,
    }
  }
  words
}

fn unquote(word: &str) -> String {
  if !word.starts_with('"') {
    return word.to_string();
  }
  let mut chars = word.chars();
  chars.next();
  chars.next_back();
  chars.as_str().to_string()
}

/// Joins arguments back into a rule specification, quoting the ones
/// `split_words` would otherwise break apart.
pub fn format_spec<S: AsRef<str>>(bits: &[S]) -> String {
  bits.iter()
    .map(|bit| {
      let bit = bit.as_ref();
      if bit.is_empty() || bit.chars().any(char::is_whitespace) {
        format!("\"{}\"", bit)
      } else {
        bit.to_string()
      }
    })
    .collect::<Vec<String>>()
    .join(" ")
}

fn is_main_option(bit: &str) -> bool {
  let mut chars = bit.chars();
  match (chars.next(), chars.next(), chars.next()) {
    (Some('-'), Some(ch), None) => ch != '-' && ch != '\n',
    _ => false,
  }
}

fn pull_extension_opts(bits: &[String], mut pos: usize) -> (&[String], usize) {
  let start = pos;
  while pos < bits.len() && !self::is_main_option(&bits[pos]) {
    pos += 1;
  }
  (&bits[start..pos], pos)
}

fn pull_main_opt(bits: &[String], mut pos: usize, flag: &str, spec: &str) -> RNFParseResult<(String, usize)> {
  let missing = || RNFParseError::MissingValue { flag: flag.to_string(), spec: spec.to_string() };
  let mut value = bits.get(pos).ok_or_else(missing)?.clone();
  pos += 1;
  if value == NEGATION {
    let negated = bits.get(pos).ok_or_else(missing)?;
    value = format!("{} {}", NEGATION, negated);
    pos += 1;
  }
  Ok((value, pos))
}

fn pull_extension_name<'a>(bits: &'a [String], pos: usize, flag: &str, spec: &str) -> RNFParseResult<&'a str> {
  bits.get(pos)
    .map(String::as_str)
    .ok_or_else(|| RNFParseError::MissingValue { flag: flag.to_string(), spec: spec.to_string() })
}

/// Parses the arguments of a single rule, for instance
/// `-s 10.0.0.0/8 -p tcp -m tcp --dport 22 -j ACCEPT`.
pub fn parse_rule(spec: &str) -> RNFParseResult<Rule> {
  let mut rule = Rule::new();
  let mut bits = self::split_words(spec);
  let mut pos = 0;
  while pos < bits.len() {
    // iptables 1.4.3 moved the negation in front of the option
    if bits[pos] == NEGATION && pos < bits.len() - 1 {
      bits.swap(pos, pos + 1);
    }
    let bit = bits[pos].clone();
    pos += 1;
    match bit.as_str() {
      "-d" => {
        let (value, next) = self::pull_main_opt(&bits, pos, &bit, spec)?;
        rule.set_destination(Some(&value));
        pos = next;
      }
      "-i" => {
        let (value, next) = self::pull_main_opt(&bits, pos, &bit, spec)?;
        rule.set_in_interface(Some(&value));
        pos = next;
      }
      "-o" => {
        let (value, next) = self::pull_main_opt(&bits, pos, &bit, spec)?;
        rule.set_out_interface(Some(&value));
        pos = next;
      }
      "-p" => {
        let (value, next) = self::pull_main_opt(&bits, pos, &bit, spec)?;
        rule.set_protocol(Some(&value));
        pos = next;
      }
      "-s" => {
        let (value, next) = self::pull_main_opt(&bits, pos, &bit, spec)?;
        rule.set_source(Some(&value));
        pos = next;
      }
      "-g" | "-j" => {
        let name = self::pull_extension_name(&bits, pos, &bit, spec)?;
        let (opts, next) = self::pull_extension_opts(&bits, pos + 1);
        let target = Target::from_bits(name, opts)?;
        if bit == "-g" {
          rule.set_goto(target);
        } else {
          rule.set_jump(target);
        }
        pos = next;
      }
      "-m" => {
        let name = self::pull_extension_name(&bits, pos, &bit, spec)?;
        let (opts, next) = self::pull_extension_opts(&bits, pos + 1);
        rule.push_match(Match::from_bits(name, opts)?);
        pos = next;
      }
      _ => return Err(RNFParseError::UnhandledRuleFlag { flag: bit, spec: spec.to_string() }),
    }
  }
  trace!("parsed rule '{}'", spec);
  Ok(rule)
}

/// Parses the chain definitions of an iptables-save dump, in dump order.
pub fn parse_chains(data: &str) -> IndexMap<String, ChainStats> {
  let mut chains = IndexMap::new();
  for line in data.lines() {
    if let Some((name, stats)) = self::chain_line(line) {
      chains.insert(name, stats);
    }
  }
  chains
}

// :<name> <policy> [<packets>:<bytes>]
// Leading colons are dropped, a name made of colons only keeps the last one.
fn chain_line(line: &str) -> Option<(String, ChainStats)> {
  let mut fields = line.splitn(3, ' ');
  let field = fields.next().filter(|field| self::is_word(field))?;
  let name = match field.trim_start_matches(':') {
    "" => &field[field.len() - 1..],
    name => name,
  };
  let policy = fields.next().filter(|policy| self::is_word(policy))?;
  let (packets, bytes) = self::counters(fields.next()?)?;
  Some((name.to_string(), ChainStats {
    policy: if policy == "-" { None } else { Some(policy.to_string()) },
    packets,
    bytes,
  }))
}

/// Parses the rules of `chain` from an iptables-save dump taken with counters.
pub fn parse_rules(data: &str, chain: &str) -> RNFParseResult<Vec<Rule>> {
  let mut rules = vec![];
  for line in data.lines() {
    let (packets, bytes, rule_chain, spec) = match self::rule_line(line) {
      Some(parts) => parts,
      None => continue,
    };
    if rule_chain != chain {
      continue;
    }
    let mut rule = self::parse_rule(spec)?;
    rule.set_counters(packets, bytes);
    rules.push(rule);
  }
  Ok(rules)
}

// [<packets>:<bytes>] -A <chain> <spec>
fn rule_line(line: &str) -> Option<(u64, u64, &str, &str)> {
  let end = line.find(']')?;
  let (packets, bytes) = self::counters(&line[..=end])?;
  let rest = line[end + 1..].strip_prefix(" -A ")?;
  let split = rest.find(char::is_whitespace)?;
  let (chain, spec) = rest.split_at(split);
  if chain.is_empty() {
    return None;
  }
  Some((packets, bytes, chain, spec.strip_prefix(' ')?))
}

// [<packets>:<bytes>]
fn counters(text: &str) -> Option<(u64, u64)> {
  let inner = text.strip_prefix('[')?.strip_suffix(']')?;
  let mut parts = inner.splitn(2, ':');
  let packets = self::counter(parts.next()?)?;
  let bytes = self::counter(parts.next()?)?;
  Some((packets, bytes))
}

fn counter(digits: &str) -> Option<u64> {
  if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  digits.parse().ok()
}

fn is_word(text: &str) -> bool {
  !text.is_empty() && !text.chars().any(char::is_whitespace)
}
