use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use tracing::info;

use crate::error::{RNFError, RNFResult};
use crate::rule::{Match, Rule, Target};
use crate::table::{Table, TableOptions};
use crate::CommandRunner;

const ICMP_TYPES: &[&str] = &[
  "echo-request",
  "network-unreachable",
  "host-unreachable",
  "port-unreachable",
  "fragmentation-needed",
  "time-exceeded",
];

const ESTABLISHED: &str = "--state ESTABLISHED,RELATED";

/// Runner shared by the tables of a `Firewall`.
pub type SharedRunner<R> = Rc<RefCell<R>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallCommand {
  Start,
  Stop,
  Restart,
}

impl FromStr for FirewallCommand {
  type Err = RNFError;

  fn from_str(command: &str) -> Result<Self, Self::Err> {
    match command {
      "start" => Ok(FirewallCommand::Start),
      "stop" => Ok(FirewallCommand::Stop),
      "restart" => Ok(FirewallCommand::Restart),
      _ => Err(RNFError::UnknownCommand(command.to_string())),
    }
  }
}

/// A simple stateful host firewall built on the `filter` table, plus the
/// `nat` table for IPv4.
///
/// # Example
///
/// ```rust
/// use rnetfilter::{CommandRunner, Firewall, RNFResult, TableOptions};
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
/// let mut firewall = Firewall::new(options, Echo);
/// firewall.start().unwrap();
/// firewall.accept_protocol(Some("eth0"), "tcp", &["22", "443"], None, None).unwrap();
/// ```
pub struct Firewall<R> {
  ipv6: bool,
  filter: Table<SharedRunner<R>>,
  nat: Option<Table<SharedRunner<R>>>,
}

impl<R: CommandRunner> Firewall<R> {
  pub fn new(options: TableOptions, runner: R) -> Firewall<R> {
    let runner = Rc::new(RefCell::new(runner));
    let nat = if options.ipv6 {
      None
    } else {
      Some(Table::new("nat", options, Rc::clone(&runner)))
    };
    Firewall {
      ipv6: options.ipv6,
      filter: Table::new("filter", options, runner),
      nat,
    }
  }

  pub fn filter(&mut self) -> &mut Table<SharedRunner<R>> {
    &mut self.filter
  }

  /// `None` for an IPv6 firewall.
  pub fn nat(&mut self) -> Option<&mut Table<SharedRunner<R>>> {
    self.nat.as_mut()
  }

  fn tables(&mut self) -> impl Iterator<Item = &mut Table<SharedRunner<R>>> {
    std::iter::once(&mut self.filter).chain(self.nat.as_mut())
  }

  /// Flushes every chain and deletes the user-defined ones.
  pub fn clear(&mut self) -> RNFResult<()> {
    for table in self.tables() {
      table.flush_chain(None)?;
      table.delete_chain(None)?;
    }
    Ok(())
  }

  pub fn commit(&mut self) -> RNFResult<()> {
    for table in self.tables() {
      table.commit()?;
    }
    Ok(())
  }

  /// Buffered commands of all tables, filter first.
  pub fn buffer(&self) -> Vec<Vec<String>> {
    let mut buffer = self.filter.buffer().to_vec();
    if let Some(nat) = &self.nat {
      buffer.extend(nat.buffer().iter().cloned());
    }
    buffer
  }

  pub fn run(&mut self, command: FirewallCommand) -> RNFResult<()> {
    match command {
      FirewallCommand::Start => self.start(),
      FirewallCommand::Stop => self.stop(),
      FirewallCommand::Restart => {
        self.stop()?;
        self.start()
      }
    }
  }

  /// Drops everything but established traffic, selected icmp and loopback.
  pub fn start(&mut self) -> RNFResult<()> {
    self.clear()?;
    self.set_default_policy()?;
    self.accept_icmp(None)?;
    self.accept_input(Some("lo"))
  }

  /// Leaves the host open.
  pub fn stop(&mut self) -> RNFResult<()> {
    self.clear()?;
    self.set_open_policy()
  }

  pub fn accept_forward(&mut self, in_interface: Option<&str>, out_interface: Option<&str>) -> RNFResult<()> {
    self.announce("allow FORWARD", in_interface);
    let mut rule = Rule::new();
    rule.set_in_interface(in_interface)
      .set_out_interface(out_interface)
      .set_jump("ACCEPT");
    self.filter.append_rule("FORWARD", &rule)
  }

  /// Accepts icmpv6 on IPv6, a fixed set of icmp types on IPv4.
  pub fn accept_icmp(&mut self, interface: Option<&str>) -> RNFResult<()> {
    self.announce("allow selected icmp INPUT", interface);
    if self.ipv6 {
      let mut rule = Rule::new();
      rule.set_in_interface(interface)
        .set_protocol(Some("icmpv6"))
        .set_jump("ACCEPT");
      return self.filter.append_rule("INPUT", &rule);
    }

    for icmp_type in ICMP_TYPES {
      let mut rule = Rule::new();
      rule.set_in_interface(interface)
        .set_protocol(Some("icmp"))
        .push_match(Match::parse("icmp", &format!("--icmp-type {}", icmp_type))?)
        .set_jump("ACCEPT");
      self.filter.append_rule("INPUT", &rule)?;
    }
    Ok(())
  }

  pub fn accept_input(&mut self, interface: Option<&str>) -> RNFResult<()> {
    self.announce("allow INPUT", interface);
    let mut rule = Rule::new();
    rule.set_in_interface(interface).set_jump("ACCEPT");
    self.filter.append_rule("INPUT", &rule)
  }

  /// Accepts new connections of `protocol` to the given destination ports.
  pub fn accept_protocol(
    &mut self,
    interface: Option<&str>,
    protocol: &str,
    ports: &[&str],
    destination: Option<&str>,
    source: Option<&str>,
  ) -> RNFResult<()> {
    let ports = ports.join(",");
    self.announce(&format!("allow selected {} INPUT (ports: {})", protocol, ports), interface);
    let mut rule = Rule::new();
    rule.set_in_interface(interface)
      .set_destination(destination)
      .set_source(source)
      .set_protocol(Some(protocol))
      .push_match(Match::parse("state", "--state NEW")?)
      .push_match(Match::parse("multiport", &format!("--destination-port {}", ports))?)
      .set_jump("ACCEPT");
    self.filter.append_rule("INPUT", &rule)
  }

  /// Sends HTTP arriving on `interface` to a local proxy. IPv4 only.
  pub fn redirect_http(&mut self, interface: Option<&str>, proxy_port: u16) -> RNFResult<()> {
    let nat = match self.nat.as_mut() {
      Some(nat) => nat,
      None => return Ok(()),
    };
    self::announce(self.ipv6, &format!("redirect HTTP to port {}", proxy_port), interface);
    let mut rule = Rule::new();
    rule.set_in_interface(interface)
      .set_protocol(Some("tcp"))
      .push_match(Match::parse("tcp", "--dport 80")?)
      .set_jump(Target::parse("REDIRECT", &format!("--to-port {}", proxy_port))?);
    nat.append_rule("PREROUTING", &rule)
  }

  pub fn set_default_policy(&mut self) -> RNFResult<()> {
    self.announce("set default policy", None);
    let mut established = Rule::new();
    established.push_match(Match::parse("state", ESTABLISHED)?).set_jump("ACCEPT");

    self.filter.set_policy("INPUT", "DROP")?;
    self.filter.append_rule("INPUT", &established)?;
    self.filter.set_policy("OUTPUT", "ACCEPT")?;
    self.filter.set_policy("FORWARD", "DROP")?;
    self.filter.append_rule("FORWARD", &established)
  }

  pub fn set_open_policy(&mut self) -> RNFResult<()> {
    self.announce("set open policy", None);
    self.filter.set_policy("INPUT", "ACCEPT")?;
    self.filter.set_policy("OUTPUT", "ACCEPT")?;
    self.filter.set_policy("FORWARD", "ACCEPT")
  }

  /// Masquerades traffic leaving through `interface`. IPv4 only.
  pub fn source_nat(&mut self, interface: Option<&str>) -> RNFResult<()> {
    let nat = match self.nat.as_mut() {
      Some(nat) => nat,
      None => return Ok(()),
    };
    self::announce(self.ipv6, "enable SNAT", interface);
    let mut rule = Rule::new();
    rule.set_out_interface(interface).set_jump("MASQUERADE");
    nat.append_rule("POSTROUTING", &rule)
  }

  fn announce(&self, message: &str, interface: Option<&str>) {
    self::announce(self.ipv6, message, interface);
  }
}

fn announce(ipv6: bool, message: &str, interface: Option<&str>) {
  let version = if ipv6 { "IPv6" } else { "IPv4" };
  match interface {
    Some(interface) => info!("{} interface {}: {}", version, interface, message),
    None => info!("{} global: {}", version, message),
  }
}
