use pretty_assertions::assert_eq;

use rnetfilter::{Match, RNFError, Rule, Table, TableOptions};

mod common;

use common::{failure, no_wait, Recorder};

const NAT_DUMP: &str = "*nat
:PREROUTING ACCEPT [5:300]
:POSTROUTING ACCEPT [2:120]
:redirects - [0:0]
[4:240] -A PREROUTING -p tcp -m tcp --dport 80 -j redirects
[4:240] -A redirects -p tcp -j REDIRECT --to-ports 8080
COMMIT
";

fn web_rule() -> Rule {
  let mut rule = Rule::new();
  rule.set_protocol(Some("tcp"))
    .push_match(Match::parse("tcp", "--dport 80").unwrap())
    .set_jump("ACCEPT");
  rule
}

#[test]
fn test_commands() {
  let mut recorder = Recorder::default();
  let mut table = Table::new("filter", no_wait(), &mut recorder);
  table.create_chain("web").unwrap();
  table.append_rule("web", &web_rule()).unwrap();
  table.prepend_rule("INPUT", &web_rule()).unwrap();
  table.delete_rule("web", &web_rule()).unwrap();
  table.set_policy("INPUT", "DROP").unwrap();
  table.rename_chain("web", "http").unwrap();
  table.flush_chain(Some("http")).unwrap();
  table.flush_chain(None).unwrap();
  table.delete_chain(Some("http")).unwrap();
  table.delete_chain(None).unwrap();
  assert!(table.buffer().is_empty());

  assert_eq!(recorder.lines(), vec![
    "iptables -t filter -N web",
    "iptables -t filter -A web -p tcp -m tcp --dport 80 -j ACCEPT",
    "iptables -t filter -I INPUT 1 -p tcp -m tcp --dport 80 -j ACCEPT",
    "iptables -t filter -D web -p tcp -m tcp --dport 80 -j ACCEPT",
    "iptables -t filter -P INPUT DROP",
    "iptables -t filter -E web http",
    "iptables -t filter -F http",
    "iptables -t filter -F",
    "iptables -t filter -X http",
    "iptables -t filter -X",
  ]);
}

#[test]
fn test_wait_detection() {
  let mut recorder = Recorder::default();
  let mut table = Table::new("nat", TableOptions { ipv6: true, ..TableOptions::default() }, &mut recorder);
  table.create_chain("a").unwrap();
  table.create_chain("b").unwrap();
  assert_eq!(table.options().wait, Some(true));

  assert_eq!(recorder.lines(), vec![
    "ip6tables -L -n --wait",
    "ip6tables --wait -t nat -N a",
    "ip6tables --wait -t nat -N b",
  ]);
}

#[test]
fn test_wait_detection_failure() {
  let mut recorder = Recorder::default().reply(failure("iptables: unrecognized option '--wait'"));
  let mut table = Table::new("filter", TableOptions::default(), &mut recorder);
  table.flush_chain(None).unwrap();
  assert_eq!(table.options().wait, Some(false));

  assert_eq!(recorder.lines(), vec!["iptables -L -n --wait", "iptables -t filter -F"]);
}

#[test]
fn test_buffered_commit() {
  let mut recorder = Recorder::default();
  let options = TableOptions { auto_commit: false, ..no_wait() };
  let mut table = Table::new("filter", options, &mut recorder);
  table.create_chain("web").unwrap();
  table.append_rule("web", &web_rule()).unwrap();

  let buffered: Vec<String> = table.buffer().iter().map(|command| command.join(" ")).collect();
  assert_eq!(buffered, vec![
    "iptables -t filter -N web",
    "iptables -t filter -A web -p tcp -m tcp --dport 80 -j ACCEPT",
  ]);

  table.commit().unwrap();
  assert!(table.buffer().is_empty());
  assert_eq!(recorder.lines().len(), 2);
}

#[test]
fn test_commit_stops_at_failure() {
  let mut recorder = Recorder::default()
    .reply(Ok(String::new()))
    .reply(failure("iptables: No chain/target/match by that name."));
  let options = TableOptions { auto_commit: false, ..no_wait() };
  let mut table = Table::new("filter", options, &mut recorder);
  table.create_chain("web").unwrap();
  table.append_rule("missing", &web_rule()).unwrap();
  table.set_policy("INPUT", "DROP").unwrap();

  match table.commit() {
    Err(RNFError::Command { message, .. }) => assert_eq!(message, "iptables: No chain/target/match by that name."),
    other => panic!("unexpected result: {:?}", other),
  }
  assert_eq!(table.buffer().len(), 2);
  assert_eq!(table.buffer()[0][3], "-A");

  table.commit().unwrap();
  assert!(table.buffer().is_empty());
}

#[test]
fn test_existing_chain_is_tolerated() {
  let mut recorder = Recorder::default().reply(failure("iptables: Chain already exists.\n"));
  let mut table = Table::new("filter", no_wait(), &mut recorder);
  table.create_chain("web").unwrap();

  let mut recorder = Recorder::default().reply(failure("iptables: Bad rule (does a matching rule exist in that chain?).\n"));
  let mut table = Table::new("filter", no_wait(), &mut recorder);
  assert!(table.delete_rule("INPUT", &web_rule()).is_err());
}

#[test]
fn test_queries() {
  let mut recorder = Recorder::default()
    .reply(Ok(NAT_DUMP.to_string()))
    .reply(Ok(NAT_DUMP.to_string()))
    .reply(Ok(NAT_DUMP.to_string()))
    .reply(Ok(NAT_DUMP.to_string()))
    .reply(Ok(NAT_DUMP.to_string()));
  let mut table = Table::new("nat", TableOptions::default(), &mut recorder);

  assert_eq!(table.list_chains().unwrap(), vec!["PREROUTING", "POSTROUTING", "redirects"]);
  assert_eq!(table.get_policy("PREROUTING").unwrap(), Some("ACCEPT".to_string()));
  assert_eq!(table.get_policy("redirects").unwrap(), None);
  assert!(matches!(table.get_policy("OUTPUT"), Err(RNFError::UnknownChain(ref chain)) if chain == "OUTPUT"));

  let rules = table.list_rules("redirects").unwrap();
  assert_eq!(rules.len(), 1);
  assert_eq!(rules[0].jump().unwrap().name(), "REDIRECT");
  assert_eq!(rules[0].packets(), 4);
  assert_eq!(rules[0].to_string(), "-p tcp -j REDIRECT --to-ports 8080");

  // queries never check for --wait
  assert_eq!(table.options().wait, None);
  assert!(recorder.lines().iter().all(|line| line == "iptables-save -t nat -c"));
}
