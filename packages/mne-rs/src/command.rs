use crate::config;
use crate::error::{MneError, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Options for `mne_process_raw`
#[derive(Debug, Clone)]
pub struct ProcessRawParams {
    pub raw: Vec<PathBuf>,
    /// Covariance definitions, one per raw file
    pub cov: Vec<PathBuf>,
    /// Averaging definitions, one per raw file
    pub ave: Vec<PathBuf>,
    /// `Some(true)` adds `--projon`, `Some(false)` adds `--projoff`
    pub proj: Option<bool>,
    /// `false` adds `--filteroff`
    pub filter: bool,
    /// Further `--key value` pairs, in order
    pub options: Vec<(String, String)>,
}

impl ProcessRawParams {
    pub fn new(raw: impl Into<PathBuf>) -> Self {
        Self {
            raw: vec![raw.into()],
            cov: Vec::new(),
            ave: Vec::new(),
            proj: None,
            filter: true,
            options: Vec::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options.push((key.into(), value.to_string()));
        self
    }
}

/// Options for `filter_raw`
#[derive(Debug, Clone)]
pub struct FilterRawParams {
    pub lowpass: Option<f64>,
    pub highpass: Option<f64>,
    pub decim: Option<usize>,
    /// Projections are off unless asked for
    pub proj: Option<bool>,
}

impl Default for FilterRawParams {
    fn default() -> Self {
        Self {
            lowpass: None,
            highpass: None,
            decim: None,
            proj: Some(false),
        }
    }
}

/// Build the `mne_process_raw` argument list.
pub fn process_raw_args(params: &ProcessRawParams) -> Result<Vec<String>> {
    let n_raw = params.raw.len();
    if n_raw == 0 {
        return Err(MneError::InvalidParameter(
            "You have to specify a raw file as input".to_string(),
        ));
    }
    for (what, n) in [("cov", params.cov.len()), ("ave", params.ave.len())] {
        if n > 0 && n != n_raw {
            return Err(MneError::InvalidParameter(format!(
                "Got {} {} definitions for {} raw files",
                n, what, n_raw
            )));
        }
    }

    let mut args = Vec::new();
    for (flag, paths) in [("--raw", &params.raw), ("--cov", &params.cov), ("--ave", &params.ave)] {
        for path in paths {
            args.push(flag.to_string());
            args.push(path.display().to_string());
        }
    }
    match params.proj {
        Some(true) => args.push("--projon".to_string()),
        Some(false) => args.push("--projoff".to_string()),
        None => {}
    }
    if !params.filter {
        args.push("--filteroff".to_string());
    }
    for (key, value) in &params.options {
        args.push(format!("--{}", key.trim_start_matches("--")));
        args.push(value.clone());
    }
    Ok(args)
}

/// Runner for the MNE-C command line tools.
#[derive(Debug, Clone)]
pub struct MneCRunner {
    bin_dir: PathBuf,
}

impl MneCRunner {
    pub fn new<P: AsRef<Path>>(bin_dir: P) -> Result<Self> {
        let bin_dir = bin_dir.as_ref().to_path_buf();
        if !bin_dir.is_dir() {
            return Err(MneError::BinaryNotFound(format!(
                "MNE-C bin directory {} does not exist",
                bin_dir.display()
            )));
        }
        Ok(Self { bin_dir })
    }

    /// Use `$MNE_ROOT/bin`.
    pub fn discover() -> Result<Self> {
        let root = config::get_config("MNE_ROOT")?.ok_or_else(|| {
            MneError::BinaryNotFound("MNE_ROOT is not set".to_string())
        })?;
        Self::new(Path::new(&root).join("bin"))
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    fn binary(&self, name: &str) -> Result<PathBuf> {
        let path = self.bin_dir.join(name);
        if !path.exists() {
            return Err(MneError::BinaryNotFound(path.display().to_string()));
        }
        Ok(path)
    }

    /// Run `name` with `args`, returning its stdout.
    pub async fn run(&self, name: &str, args: &[String]) -> Result<String> {
        let binary = self.binary(name)?;
        let mut command = Command::new(&binary);
        command.args(args);

        log::info!("Running: {} {}", name, args.join(" "));
        let start_time = std::time::Instant::now();
        let output = command
            .output()
            .await
            .map_err(|e| MneError::ExecutionFailed(format!("Failed to execute {}: {}", name, e)))?;
        log::info!(
            "{} finished in {:.2}s",
            name,
            start_time.elapsed().as_secs_f64()
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!("{} failed with status: {}", name, output.status);
            log::error!("stderr: {}", stderr);
            return Err(MneError::ExecutionFailed(format!(
                "{} failed with status: {}. stderr: {}",
                name, output.status, stderr
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn process_raw(&self, params: &ProcessRawParams) -> Result<String> {
        let args = process_raw_args(params)?;
        self.run("mne_process_raw", &args).await
    }

    /// Filter (and optionally decimate) a raw file into `raw_out`.
    pub async fn filter_raw(
        &self,
        raw_in: impl Into<PathBuf>,
        raw_out: impl AsRef<Path>,
        params: &FilterRawParams,
    ) -> Result<String> {
        let mut request = ProcessRawParams::new(raw_in)
            .option("save", raw_out.as_ref().display());
        if let Some(lowpass) = params.lowpass {
            request = request.option("lowpass", lowpass);
        }
        if let Some(highpass) = params.highpass {
            request = request.option("highpass", highpass);
        }
        if let Some(decim) = params.decim {
            request = request.option("decim", decim);
        }
        request.proj = params.proj;
        self.process_raw(&request).await
    }

    /// Check (and with `fix`, correct) EEG locations against digitizer data.
    pub async fn check_eeg_locations(
        &self,
        fname: impl AsRef<Path>,
        dig: impl AsRef<Path>,
        fix: bool,
    ) -> Result<String> {
        let mut args = vec![
            "--file".to_string(),
            fname.as_ref().display().to_string(),
            "--dig".to_string(),
            dig.as_ref().display().to_string(),
        ];
        if fix {
            args.push("--fix".to_string());
        }
        self.run("mne_check_eeg_locations", &args).await
    }

    /// Mark the channels listed in `bad_fname` as bad in `fname`.
    pub async fn mark_bad_channels(
        &self,
        fname: impl AsRef<Path>,
        bad_fname: impl AsRef<Path>,
    ) -> Result<String> {
        let args = vec![
            "--bad".to_string(),
            bad_fname.as_ref().display().to_string(),
            fname.as_ref().display().to_string(),
        ];
        self.run("mne_mark_bad_channels", &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_raw_args() {
        let mut params = ProcessRawParams::new("a_raw.json")
            .option("lowpass", 40)
            .option("--save", "out_raw.json");
        params.raw.push(PathBuf::from("b_raw.json"));
        params.ave = vec![PathBuf::from("a.ave"), PathBuf::from("b.ave")];
        params.proj = Some(false);
        params.filter = false;

        let args = process_raw_args(&params).unwrap();
        assert_eq!(
            args,
            vec![
                "--raw", "a_raw.json", "--raw", "b_raw.json", "--ave", "a.ave", "--ave", "b.ave",
                "--projoff", "--filteroff", "--lowpass", "40", "--save", "out_raw.json",
            ]
        );
    }

    #[test]
    fn test_process_raw_args_validation() {
        let mut params = ProcessRawParams::new("a_raw.json");
        params.cov = vec![PathBuf::from("a.cov"), PathBuf::from("b.cov")];
        assert!(process_raw_args(&params).is_err());

        params.raw.clear();
        params.cov.clear();
        assert!(process_raw_args(&params).is_err());

        let mut params = ProcessRawParams::new("a_raw.json");
        params.proj = Some(true);
        assert_eq!(process_raw_args(&params).unwrap(), vec!["--raw", "a_raw.json", "--projon"]);
    }

    #[test]
    fn test_missing_binaries() {
        assert!(matches!(
            MneCRunner::new("/definitely/not/here"),
            Err(MneError::BinaryNotFound(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        let runner = MneCRunner::new(dir.path()).unwrap();
        assert!(matches!(
            runner.binary("mne_process_raw"),
            Err(MneError::BinaryNotFound(_))
        ));
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_filter_raw_runs_process_raw() {
        let dir = tempfile::tempdir().unwrap();
        fake_tool(dir.path(), "mne_process_raw", "echo \"$@\"");
        let runner = MneCRunner::new(dir.path()).unwrap();

        let params = FilterRawParams {
            lowpass: Some(40.0),
            decim: Some(4),
            ..Default::default()
        };
        let out = runner.filter_raw("in_raw.json", "out_raw.json", &params).await.unwrap();
        assert_eq!(
            out.trim(),
            "--raw in_raw.json --projoff --save out_raw.json --lowpass 40 --decim 4"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_filter_raw_projection_switch() {
        let dir = tempfile::tempdir().unwrap();
        fake_tool(dir.path(), "mne_process_raw", "echo \"$@\"");
        let runner = MneCRunner::new(dir.path()).unwrap();

        let out = runner
            .filter_raw("in_raw.json", "out_raw.json", &FilterRawParams::default())
            .await
            .unwrap();
        assert_eq!(out.trim(), "--raw in_raw.json --projoff --save out_raw.json");

        let params = FilterRawParams {
            proj: Some(true),
            ..Default::default()
        };
        let out = runner.filter_raw("in_raw.json", "out_raw.json", &params).await.unwrap();
        assert!(out.contains("--projon"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_tool_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        fake_tool(dir.path(), "mne_mark_bad_channels", "echo 'no such file' >&2; exit 3");
        let runner = MneCRunner::new(dir.path()).unwrap();
        let err = runner
            .mark_bad_channels("test_raw.fif", "bads.txt")
            .await
            .unwrap_err();
        match err {
            MneError::ExecutionFailed(msg) => assert!(msg.contains("no such file")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
