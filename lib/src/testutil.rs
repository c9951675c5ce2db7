//! A recording [`Runner`] for unit tests.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};

use crate::runner::Runner;
use crate::task::Task;

#[derive(Debug, Default)]
pub(crate) struct FakeRunner {
    log: RefCell<Vec<Task>>,
    /// Command line prefix and queued stdout; the last entry repeats.
    outputs: RefCell<Vec<(String, VecDeque<String>)>>,
    /// Command line prefix and the number of times it should still fail.
    failures: RefCell<Vec<(String, usize)>>,
    paths: RefCell<HashSet<Utf8PathBuf>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A runner which sees the default disk and a running root on a USB stick.
    pub(crate) fn with_installer() -> Self {
        let r = Self::new();
        r.add_path("/dev/nvme0n1");
        r.output("findmnt -n -o SOURCE --target /", "/dev/sda3\n");
        r.output("blockdev --getsize64 /dev/sda3", "5368709120\n");
        r.output("blockdev --getsize64 /dev/nvme0n1p", "5368709120\n");
        r.output("blkid -o value -s UUID /dev/sda3", "0b1ad0c0-0000-4000-8000-0000000000aa\n");
        r
    }

    /// Like [`Self::with_installer`], with the disk carrying our layout.
    pub(crate) fn with_layout() -> Self {
        let r = Self::with_installer();
        for (dev, ty, label) in [
            ("p1", "vfat", "esp"),
            ("p2", "vfat", "efi-A"),
            ("p3", "vfat", "efi-B"),
            ("p6", "ext4", "var-A"),
            ("p7", "ext4", "var-B"),
            ("p8", "ext4", "home"),
        ] {
            r.output(&format!("blkid -o value -s TYPE /dev/nvme0n1{dev}"), ty);
            r.output(&format!("blkid -o value -s PARTLABEL /dev/nvme0n1{dev}"), label);
        }
        r
    }

    pub(crate) fn add_path(&self, p: impl Into<Utf8PathBuf>) {
        self.paths.borrow_mut().insert(p.into());
    }

    pub(crate) fn output(&self, prefix: &str, out: &str) {
        let mut outputs = self.outputs.borrow_mut();
        if let Some((_, q)) = outputs.iter_mut().find(|(p, _)| p == prefix) {
            q.push_back(out.to_string());
        } else {
            outputs.push((prefix.to_string(), VecDeque::from([out.to_string()])));
        }
    }

    pub(crate) fn fail(&self, prefix: &str, times: usize) {
        self.failures.borrow_mut().push((prefix.to_string(), times));
    }

    /// All executed command lines, in order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.log.borrow().iter().map(|t| t.to_string()).collect()
    }

    pub(crate) fn tasks(&self) -> Vec<Task> {
        self.log.borrow().clone()
    }

    /// Executed command lines starting with `prefix`.
    pub(crate) fn matching(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, task: &Task) -> Result<()> {
        self.log.borrow_mut().push(task.clone());
        let line = task.to_string();
        let mut failures = self.failures.borrow_mut();
        if let Some((_, n)) = failures
            .iter_mut()
            .find(|(p, n)| *n > 0 && line.starts_with(p.as_str()))
        {
            *n -= 1;
            anyhow::bail!("Task {} failed: exit status: 1", task.description);
        }
        Ok(())
    }
}

impl Runner for FakeRunner {
    fn run(&self, task: &Task) -> Result<()> {
        self.record(task)
    }

    fn read(&self, task: &Task) -> Result<String> {
        self.record(task)?;
        let line = task.to_string();
        let mut outputs = self.outputs.borrow_mut();
        // The most specific prefix wins
        let r = outputs
            .iter_mut()
            .filter(|(p, _)| line.starts_with(p.as_str()))
            .max_by_key(|(p, _)| p.len())
            .map(|(_, q)| {
                if q.len() > 1 {
                    q.pop_front().unwrap_or_default()
                } else {
                    q.front().cloned().unwrap_or_default()
                }
            })
            .unwrap_or_default();
        Ok(r)
    }

    fn path_exists(&self, path: &Utf8Path) -> bool {
        self.paths.borrow().contains(path)
    }
}
