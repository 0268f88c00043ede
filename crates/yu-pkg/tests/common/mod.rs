#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use yu_exec::{CommandOutput, ExecError, Executor};
use yu_node::{Location, Node, NodeError};

/// Records `program args...` lines and answers from a queue (default: success)
#[derive(Default)]
pub struct MockExecutor {
    pub calls: Mutex<Vec<String>>,
    pub outputs: Mutex<VecDeque<CommandOutput>>,
}

impl MockExecutor {
    pub fn push_output(&self, status: i32, stdout: &str) {
        self.outputs
            .lock()
            .unwrap()
            .push_back(CommandOutput::synthetic(status, stdout));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ExecError> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().unwrap().push(line);
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| CommandOutput::synthetic(0, "")))
    }

    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        self.run(program, args).await
    }

    fn executor_type(&self) -> &'static str {
        "mock"
    }
}

/// Node that records commands, copies and deletes
pub struct MockNode {
    pub location: Location,
    pub commands: Vec<String>,
    pub copied: Vec<PathBuf>,
    pub deleted: Vec<String>,
    pub outputs: HashMap<String, CommandOutput>,
}

impl MockNode {
    pub fn new(address: &str) -> Self {
        Self {
            location: Location::new(address),
            commands: Vec::new(),
            copied: Vec::new(),
            deleted: Vec::new(),
            outputs: HashMap::new(),
        }
    }

    pub fn respond(&mut self, command: &str, status: i32, stdout: &str) {
        self.outputs
            .insert(command.to_string(), CommandOutput::synthetic(status, stdout));
    }
}

#[async_trait]
impl Node for MockNode {
    fn location(&self) -> &Location {
        &self.location
    }

    async fn command(
        &mut self,
        command: &str,
        _timeout: Option<Duration>,
        _shell: bool,
    ) -> Result<CommandOutput, NodeError> {
        self.commands.push(command.to_string());
        Ok(self
            .outputs
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandOutput::synthetic(0, "")))
    }

    async fn is_dir(&mut self, _path: &str) -> Result<bool, NodeError> {
        Ok(true)
    }

    async fn copy_file_to(
        &mut self,
        local_file: &Path,
        _destination_filename: Option<&str>,
        _destination_dir: Option<&str>,
    ) -> Result<(), NodeError> {
        self.copied.push(local_file.to_path_buf());
        Ok(())
    }

    async fn delete_file(
        &mut self,
        path: &str,
        _error_if_not_exists: bool,
    ) -> Result<(), NodeError> {
        self.deleted.push(path.to_string());
        Ok(())
    }
}
