//! Conversion sinks: spawn the planned commands, or only record them.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use hirni_core::plan::Command as PlannedCommand;
use hirni_core::{ConversionSink, ExternalActionError, Invocation};
use tracing::{debug, info};

/// Runs invocations as child processes from the dataset root.
///
/// Containerized invocations go through `datalad containers-run`, which
/// also records inputs, outputs and the message with the dataset.
#[derive(Debug)]
pub struct ProcessSink {
    root: PathBuf,
}

impl ProcessSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn build(&self, invocation: &Invocation) -> Command {
        let mut cmd = match (&invocation.container, &invocation.command) {
            (Some(container), planned) => {
                let mut cmd = Command::new("datalad");
                cmd.args(["containers-run", "-n", container.as_str()]);
                cmd.args(["-m", invocation.message.as_str()]);
                for input in &invocation.inputs {
                    cmd.args(["-i", input.as_str()]);
                }
                for output in &invocation.outputs {
                    cmd.args(["-o", output.as_str()]);
                }
                cmd.arg(planned.display());
                cmd
            }
            (None, PlannedCommand::Argv(argv)) => {
                let mut cmd = Command::new(argv.first().map_or("", String::as_str));
                cmd.args(argv.iter().skip(1));
                cmd
            }
            (None, PlannedCommand::Shell(line)) => {
                let mut cmd = Command::new("sh");
                cmd.args(["-c", line.as_str()]);
                cmd
            }
        };
        cmd.current_dir(&self.root)
            .envs(&invocation.env)
            .stdin(Stdio::null());
        cmd
    }
}

impl ConversionSink for ProcessSink {
    fn execute(&mut self, invocation: &Invocation) -> Result<(), ExternalActionError> {
        let mut cmd = self.build(invocation);
        info!(command = %invocation.command.display(), "running conversion");
        let failed = |message: String| ExternalActionError {
            action: invocation.message.clone(),
            message,
        };
        let status = cmd.status().map_err(|e| failed(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(failed(match status.code() {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".to_string(),
            }))
        }
    }
}

/// Records invocations without running anything.
#[derive(Debug, Default)]
pub struct DryRunSink {
    pub seen: Vec<Invocation>,
}

impl ConversionSink for DryRunSink {
    fn execute(&mut self, invocation: &Invocation) -> Result<(), ExternalActionError> {
        debug!(command = %invocation.command.display(), "dry run");
        self.seen.push(invocation.clone());
        Ok(())
    }
}

/// One-line rendering of an invocation, container first.
pub fn describe(invocation: &Invocation) -> String {
    match &invocation.container {
        Some(container) => format!("[{container}] {}", invocation.command.display()),
        None => invocation.command.display(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn invocation(command: PlannedCommand, container: Option<&str>) -> Invocation {
        Invocation {
            command,
            container: container.map(str::to_string),
            inputs: vec!["acq1/dicoms".into(), "acq1/studyspec.json".into()],
            outputs: vec![".".into()],
            message: "Conversion of acq1/dicoms in acquisition acq1.".into(),
            env: BTreeMap::from([("HIRNI_STUDY_SPEC".into(), "acq1/studyspec.json".into())]),
        }
    }

    #[test]
    fn containerized_commands_go_through_containers_run() {
        let sink = ProcessSink::new(".");
        let cmd = sink.build(&invocation(
            PlannedCommand::Argv(vec!["heudiconv".into(), "-f".into(), "hirni".into()]),
            Some("conversion"),
        ));
        assert_eq!(cmd.get_program(), "datalad");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "containers-run",
                "-n",
                "conversion",
                "-m",
                "Conversion of acq1/dicoms in acquisition acq1.",
                "-i",
                "acq1/dicoms",
                "-i",
                "acq1/studyspec.json",
                "-o",
                ".",
                "heudiconv -f hirni",
            ]
        );
    }

    #[test]
    fn shell_commands_run_with_the_study_spec_in_the_environment() {
        let tmp = TempDir::new().unwrap();
        let mut sink = ProcessSink::new(tmp.path());
        let ok = invocation(
            PlannedCommand::Shell("test \"$HIRNI_STUDY_SPEC\" = acq1/studyspec.json".into()),
            None,
        );
        assert!(sink.execute(&ok).is_ok());

        let err = sink
            .execute(&invocation(PlannedCommand::Shell("exit 3".into()), None))
            .unwrap_err();
        assert_eq!(err.message, "exited with status 3");
        assert!(err.action.starts_with("Conversion of acq1/dicoms"));
    }

    #[test]
    fn dry_run_records_without_running() {
        let mut sink = DryRunSink::default();
        let inv = invocation(PlannedCommand::Shell("exit 1".into()), Some("conversion"));
        assert!(sink.execute(&inv).is_ok());
        assert_eq!(sink.seen.len(), 1);
        assert_eq!(describe(&inv), "[conversion] exit 1");
    }
}
