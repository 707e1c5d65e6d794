//! The qtest command interpreter
//!
//! Reads one command per line and runs it against the current queue. Every
//! queue call goes through `strqueue::handle` inside a tracked heap region,
//! so freeing the queue can check that nothing it allocated is left behind.

use std::io::{self, BufRead, Write};

use strqueue::heap::{self, HeapConfig};
use strqueue::{handle, Queue, QueueError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

const HELP: &[(&str, &str)] = &[
    ("new", "Create a new queue, freeing the current one"),
    ("free", "Free the current queue"),
    ("ih STR [N]", "Insert STR at head N times (default 1)"),
    ("it STR [N]", "Insert STR at tail N times (default 1)"),
    ("rh [EXPECTED]", "Remove from head, optionally checking the value"),
    ("rhq", "Remove from head without copying the value"),
    ("reverse", "Reverse the queue"),
    ("size [EXPECTED]", "Print the queue size, optionally checking it"),
    ("show", "Print the queue contents"),
    ("fail N|off", "Fail queue allocations after N succeed, or stop failing"),
    ("help", "Print this list"),
    ("quit", "Stop reading commands"),
];

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("{command} needs {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },

    #[error("'{0}' is not a count")]
    BadCount(String),

    #[error("insertion of {value} failed")]
    InsertFailed { value: String },

    #[error("removal from a non-empty queue failed")]
    RemoveFailed,

    #[error("removed {found}, expected {expected}")]
    WrongValue { expected: String, found: String },

    #[error("queue size is {found}, expected {expected}")]
    WrongSize { expected: usize, found: usize },

    #[error("freed queue, but {0} bytes are still allocated")]
    Leak(isize),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct Console {
    queue: Option<Queue>,
    string_limit: usize,
    echo: bool,
    injecting: bool,
    errors: usize,
    done: bool,
}

impl Console {
    pub fn new(config: &Config) -> Console {
        Console {
            queue: None,
            string_limit: config.string_limit,
            echo: config.echo,
            injecting: config.fail_after.is_some(),
            errors: 0,
            done: false,
        }
    }

    /// Run every command in `input`, then free any queue left over. Returns
    /// the number of commands that reported an error.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> io::Result<usize> {
        for (number, line) in input.lines().enumerate() {
            let line = line?;
            let command = match line.split('#').next() {
                Some(command) => command.trim(),
                None => continue,
            };
            if command.is_empty() {
                continue;
            }

            if self.echo {
                writeln!(out, "cmd> {}", command)?;
            }
            debug!(line = number + 1, command, "running");

            let result = self.execute(command, out);
            self.report(result, out)?;

            if self.done {
                break;
            }
        }

        if self.queue.is_some() {
            let result = self.free(out);
            self.report(result, out)?;
        }

        Ok(self.errors)
    }

    // Count and print a failed command; pass output errors on.
    fn report<W: Write>(&mut self, result: Result<(), CommandError>, out: &mut W) -> io::Result<()> {
        let result = result.and_then(|()| self.check());

        match result {
            Ok(()) => Ok(()),
            Err(CommandError::Io(e)) => Err(e),
            Err(e) => {
                warn!("{}", e);
                self.errors += 1;
                writeln!(out, "ERROR: {}", e)
            }
        }
    }

    // Check the queue structure after every command
    fn check(&self) -> Result<(), CommandError> {
        match &self.queue {
            Some(q) => Ok(q.verify()?),
            None => Ok(()),
        }
    }

    /// Run a single command line
    pub fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> Result<(), CommandError> {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            Some(command) => command,
            None => return Ok(()),
        };
        let args: Vec<&str> = words.collect();

        match command {
            "new" => self.new_queue(out),
            "free" => self.free(out),
            "ih" => self.insert("ih", &args, out),
            "it" => self.insert("it", &args, out),
            "rh" => self.remove(args.first().copied(), out),
            "rhq" => self.remove_quiet(out),
            "reverse" => self.reverse(out),
            "size" => self.size(args.first().copied(), out),
            "show" => self.show(out),
            "fail" => self.fail(args.first().copied(), out),
            "help" => self.help(out),
            "quit" => {
                self.done = true;
                Ok(())
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    fn new_queue<W: Write>(&mut self, out: &mut W) -> Result<(), CommandError> {
        if self.queue.is_some() {
            self.free(out)?;
        }

        heap::reset();
        self.queue = Some(heap::tracked(handle::new));
        info!("created queue");
        self.show(out)
    }

    fn free<W: Write>(&mut self, out: &mut W) -> Result<(), CommandError> {
        let q = self.queue.take();
        let present = q.is_some();
        heap::tracked(|| handle::free(q));

        if !present {
            writeln!(out, "Warning: calling free on null queue")?;
            return Ok(());
        }

        let live = heap::stats().live_bytes;
        info!(live, "freed queue");
        if live != 0 {
            return Err(CommandError::Leak(live));
        }
        self.show(out)
    }

    fn insert<W: Write>(
        &mut self,
        command: &'static str,
        args: &[&str],
        out: &mut W,
    ) -> Result<(), CommandError> {
        let value = match args.first() {
            Some(value) => *value,
            None => {
                return Err(CommandError::MissingArgument {
                    command,
                    what: "a string",
                })
            }
        };
        let count = match args.get(1) {
            Some(count) => parse_count(count)?,
            None => 1,
        };

        if self.queue.is_none() {
            writeln!(out, "Warning: calling {} on null queue", command)?;
        }

        for _ in 0..count {
            let inserted = heap::tracked(|| match command {
                "ih" => handle::insert_head(self.queue.as_mut(), value),
                _ => handle::insert_tail(self.queue.as_mut(), value),
            });

            if self.queue.is_none() {
                return Ok(());
            }
            if !inserted {
                if self.injecting {
                    writeln!(out, "Insertion of {} failed (allocation failure injected)", value)?;
                    break;
                }
                return Err(CommandError::InsertFailed {
                    value: value.to_string(),
                });
            }
        }

        self.show(out)
    }

    fn remove<W: Write>(&mut self, expected: Option<&str>, out: &mut W) -> Result<(), CommandError> {
        if self.starts_empty("rh", out)? {
            return Ok(());
        }

        let mut buf = vec![0u8; self.string_limit];
        let removed = heap::tracked(|| handle::remove_head(self.queue.as_mut(), Some(&mut buf[..])));
        if !removed {
            return Err(CommandError::RemoveFailed);
        }

        let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        let found = String::from_utf8_lossy(&buf[..end]).into_owned();
        writeln!(out, "Removed {} from queue", found)?;

        if let Some(expected) = expected {
            if expected != found {
                return Err(CommandError::WrongValue {
                    expected: expected.to_string(),
                    found,
                });
            }
        }
        self.show(out)
    }

    fn remove_quiet<W: Write>(&mut self, out: &mut W) -> Result<(), CommandError> {
        if self.starts_empty("rhq", out)? {
            return Ok(());
        }

        if !heap::tracked(|| handle::remove_head(self.queue.as_mut(), None)) {
            return Err(CommandError::RemoveFailed);
        }
        writeln!(out, "Removed element from queue")?;
        self.show(out)
    }

    // Warn and return true if removal cannot succeed. Still makes the call on
    // an absent queue, which must fail quietly.
    fn starts_empty<W: Write>(&mut self, command: &str, out: &mut W) -> Result<bool, CommandError> {
        match &self.queue {
            None => {
                writeln!(out, "Warning: calling {} on null queue", command)?;
                let removed = heap::tracked(|| handle::remove_head(None, None));
                debug!(removed, "remove on null queue");
                Ok(true)
            }
            Some(q) if q.is_empty() => {
                writeln!(out, "Warning: calling {} on empty queue", command)?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    fn reverse<W: Write>(&mut self, out: &mut W) -> Result<(), CommandError> {
        if self.queue.is_none() {
            writeln!(out, "Warning: calling reverse on null queue")?;
        }
        heap::tracked(|| handle::reverse(self.queue.as_mut()));
        self.show(out)
    }

    fn size<W: Write>(&mut self, expected: Option<&str>, out: &mut W) -> Result<(), CommandError> {
        let found = heap::tracked(|| handle::size(self.queue.as_ref()));
        writeln!(out, "Queue size = {}", found)?;

        if let Some(expected) = expected {
            let expected = parse_count(expected)?;
            if expected != found {
                return Err(CommandError::WrongSize { expected, found });
            }
        }
        Ok(())
    }

    fn show<W: Write>(&mut self, out: &mut W) -> Result<(), CommandError> {
        match &self.queue {
            Some(q) => writeln!(out, "q = {:?}", q)?,
            None => writeln!(out, "q = NULL")?,
        }
        Ok(())
    }

    fn fail<W: Write>(&mut self, arg: Option<&str>, out: &mut W) -> Result<(), CommandError> {
        let fail_after = match arg {
            Some("off") => None,
            Some(n) => Some(parse_count(n)?),
            None => {
                return Err(CommandError::MissingArgument {
                    command: "fail",
                    what: "a count or 'off'",
                })
            }
        };

        heap::configure(HeapConfig { fail_after });
        self.injecting = fail_after.is_some();
        match fail_after {
            Some(n) => writeln!(out, "Queue allocations fail after {} more", n)?,
            None => writeln!(out, "Queue allocation failures off")?,
        }
        Ok(())
    }

    fn help<W: Write>(&mut self, out: &mut W) -> Result<(), CommandError> {
        for (usage, about) in HELP {
            writeln!(out, "  {:<16} | {}", usage, about)?;
        }
        Ok(())
    }
}

fn parse_count(s: &str) -> Result<usize, CommandError> {
    s.parse().map_err(|_| CommandError::BadCount(s.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    // Run a script and return the error count and everything printed.
    fn run_script(args: &[&str], script: &str) -> (usize, String) {
        let mut argv = vec!["qtest"];
        argv.extend_from_slice(args);
        let config = Config::parse_from(argv);

        let mut console = Console::new(&config);
        let mut out = Vec::new();
        let errors = console.run(script.as_bytes(), &mut out).unwrap();
        heap::configure(HeapConfig::default());

        (errors, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_basic_script() {
        let script = "
            new
            it a
            it b
            ih c
            show
            size 3
            rh c
            size 2
            free
        ";
        let (errors, out) = run_script(&[], script);

        assert_eq!(errors, 0, "{}", out);
        assert!(out.contains(r#"q = ["c", "a", "b"]"#));
        assert!(out.contains("Removed c from queue"));
        assert!(out.contains(r#"q = ["a", "b"]"#));
        assert!(out.ends_with("q = NULL\n"));
    }

    #[test]
    fn test_repeat_count_and_reverse() {
        let script = "
            new
            ih x 3
            it y 2
            reverse
            rh y
            rh y
            rh x
            size 2
        ";
        let (errors, out) = run_script(&[], script);
        assert_eq!(errors, 0, "{}", out);
    }

    #[test]
    fn test_mismatches_are_errors() {
        let script = "
            new
            it a
            rh b
            size 5
        ";
        let (errors, out) = run_script(&[], script);

        assert_eq!(errors, 2);
        assert!(out.contains("ERROR: removed a, expected b"));
        assert!(out.contains("ERROR: queue size is 0, expected 5"));
    }

    #[test]
    fn test_null_queue_warns() {
        let script = "
            ih a
            it a
            rh
            rhq
            reverse
            size 0
            show
            free
        ";
        let (errors, out) = run_script(&[], script);

        assert_eq!(errors, 0, "{}", out);
        assert!(out.contains("Warning: calling ih on null queue"));
        assert!(out.contains("Warning: calling rh on null queue"));
        assert!(out.contains("Warning: calling free on null queue"));
        assert!(out.contains("q = NULL"));
    }

    #[test]
    fn test_empty_removal_warns() {
        let (errors, out) = run_script(&[], "new\nrh\nrhq\n");
        assert_eq!(errors, 0, "{}", out);
        assert!(out.contains("Warning: calling rh on empty queue"));
        assert!(out.contains("Warning: calling rhq on empty queue"));
    }

    #[test]
    fn test_string_limit_truncates() {
        let (errors, out) = run_script(&["--string-limit", "4"], "new\nit abcdefg\nrh abc\n");
        assert_eq!(errors, 0, "{}", out);
        assert!(out.contains("Removed abc from queue"));
    }

    #[test]
    fn test_injected_failure_noted() {
        let script = "
            new
            fail 0
            ih a
            fail off
            ih b
            size 1
            rh b
        ";
        let (errors, out) = run_script(&[], script);

        assert_eq!(errors, 0, "{}", out);
        assert!(out.contains("Insertion of a failed (allocation failure injected)"));
    }

    #[test]
    fn test_comments_and_quit() {
        let script = "
            # set up
            new   # fresh queue
            it a
            quit
            bogus
        ";
        let (errors, out) = run_script(&["--echo"], script);

        assert_eq!(errors, 0, "{}", out);
        assert!(out.contains("cmd> new"));
        assert!(!out.contains("bogus"));
    }

    #[test]
    fn test_bad_commands() {
        let script = "
            frobnicate
            new
            ih
            ih a lots
            fail
        ";
        let (errors, out) = run_script(&[], script);

        assert_eq!(errors, 4, "{}", out);
        assert!(out.contains("ERROR: unknown command 'frobnicate'"));
        assert!(out.contains("ERROR: ih needs a string"));
        assert!(out.contains("ERROR: 'lots' is not a count"));
    }

    // New on an existing queue frees the old one first, and the whole run
    // releases everything the queues allocated.
    #[test]
    fn test_new_replaces_queue() {
        let script = "
            new
            it a 10
            new
            size 0
            it b
        ";
        let (errors, out) = run_script(&[], script);
        assert_eq!(errors, 0, "{}", out);
    }

    #[test]
    fn test_trace_files() {
        for script in [
            include_str!("../traces/basic.cmd"),
            include_str!("../traces/reverse.cmd"),
            include_str!("../traces/malloc.cmd"),
        ] {
            let (errors, out) = run_script(&[], script);
            assert_eq!(errors, 0, "{}", out);
        }
    }

    #[test]
    fn test_help() {
        let (errors, out) = run_script(&[], "help\n");
        assert_eq!(errors, 0);
        assert!(out.contains("reverse"));
        assert_eq!(out.lines().count(), HELP.len());
    }
}
