//! Scripted [`CommandRunner`] for exercising the lifecycle without devices.

use std::cell::RefCell;

use vdisk_common::error::Result;

use crate::process::{CommandOutput, CommandRunner, Invocation};

struct Rule {
    prefix: String,
    output: CommandOutput,
}

/// Records every command line and answers from a table of canned results.
///
/// A rule matches a command line equal to its prefix or starting with the
/// prefix followed by a space; the longest matching prefix wins, and of equal
/// prefixes the one added last. Unmatched commands succeed with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: RefCell<Vec<Invocation>>,
}

impl ScriptedRunner {
    /// Creates a runner where every command succeeds silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers commands starting with `prefix` with `stdout` and status 0.
    #[must_use]
    pub fn respond(mut self, prefix: &str, stdout: &[&str]) -> Self {
        self.rules.push(Rule {
            prefix: prefix.into(),
            output: CommandOutput {
                exit_code: 0,
                stdout: stdout.iter().map(|s| (*s).to_owned()).collect(),
                stderr: Vec::new(),
            },
        });
        self
    }

    /// Makes commands starting with `prefix` exit with `exit_code`.
    #[must_use]
    pub fn fail(mut self, prefix: &str, exit_code: i32) -> Self {
        self.rules.push(Rule {
            prefix: prefix.into(),
            output: CommandOutput {
                exit_code,
                stdout: Vec::new(),
                stderr: vec![format!("{prefix}: scripted failure")],
            },
        });
        self
    }

    /// Answers the usual attach/activate queries for a two-partition image
    /// with `root` and `swap` logical volumes in `VolGroup00`.
    #[must_use]
    pub fn with_standard_image(self) -> Self {
        self.respond("losetup --show -f", &["/dev/loop0"])
            .respond(
                "kpartx -v -a /dev/loop0",
                &[
                    "add map loop0p1 (253:0): 0 1046528 linear 7:0 2048",
                    "add map loop0p2 (253:1): 0 15728640 linear 7:0 1048576",
                ],
            )
            .respond(
                "lvm lvdisplay -c VolGroup00",
                &[
                    "  /dev/VolGroup00/root:VolGroup00:3:1:-1:1:8388608:1024:-1:0:-1:253:2",
                    "  /dev/VolGroup00/swap:VolGroup00:3:1:-1:1:2097152:256:-1:0:-1:253:3",
                ],
            )
    }

    /// Every command line seen so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }

    /// Every invocation seen so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Command lines seen so far that start with `program`.
    #[must_use]
    pub fn calls_to(&self, program: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|line| line.split(' ').next() == Some(program))
            .collect()
    }

    fn lookup(&self, line: &str) -> CommandOutput {
        self.rules
            .iter()
            .filter(|rule| {
                line == rule.prefix
                    || line
                        .strip_prefix(rule.prefix.as_str())
                        .is_some_and(|rest| rest.starts_with(' '))
            })
            .max_by_key(|rule| rule.prefix.len())
            .map(|rule| rule.output.clone())
            .unwrap_or_default()
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let output = self.lookup(&invocation.to_string());
        self.calls.borrow_mut().push(invocation.clone());
        Ok(output)
    }
}
