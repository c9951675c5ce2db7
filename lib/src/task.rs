use std::fmt::Display;
use std::process::{Command, Stdio};

/// A single invocation of an external tool, described as data so that it
/// can be logged, compared and handed to a [`crate::runner::Runner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Task {
    pub(crate) description: String,
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) stdin: Option<String>,
    pub(crate) quiet: bool,
    pub(crate) quiet_output: bool,
    pub(crate) interactive: bool,
}

impl Task {
    pub(crate) fn new(description: impl AsRef<str>, exe: impl AsRef<str>) -> Self {
        Self {
            description: description.as_ref().to_string(),
            program: exe.as_ref().to_string(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            quiet: false,
            quiet_output: false,
            interactive: false,
        }
    }

    /// Don't print the description when running.
    pub(crate) fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Discard the tool's stdout.
    pub(crate) fn quiet_output(mut self) -> Self {
        self.quiet_output = true;
        self
    }

    /// Hand the terminal to the child.
    pub(crate) fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub(crate) fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub(crate) fn args<S: AsRef<str>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub(crate) fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    pub(crate) fn envs<K: AsRef<str>, V: AsRef<str>>(
        mut self,
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        for (k, v) in vars {
            self = self.env(k, v);
        }
        self
    }

    /// Feed this buffer to the child on stdin.
    pub(crate) fn stdin_buf(mut self, buf: impl Into<String>) -> Self {
        self.stdin = Some(buf.into());
        self
    }

    /// Build the process; stdin defaults to noninteractive.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));
        if self.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else if !self.interactive {
            cmd.stdin(Stdio::null());
        }
        if self.quiet_output {
            cmd.stdout(Stdio::null());
        }
        cmd
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (k, v) in self.env.iter() {
            write!(f, "{k}={v} ")?;
        }
        f.write_str(&self.program)?;
        for a in self.args.iter() {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}
