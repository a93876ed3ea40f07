use std::{
    ffi::OsString,
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::process::Command;

use crate::{
    config::{DecryptorKind, ToolsConfig},
    error::{DrmdlError, DrmdlResult},
    model::DecryptionKey,
    util::command::run_command,
};

/// Decrypts one CENC protected track with a set of content keys.
///
/// All known keys are passed; the tool picks the one matching the key id in the track.
pub trait Decryptor {
    fn decrypt(
        &self,
        keys: &[DecryptionKey],
        input: &Path,
        output: &Path,
    ) -> impl Future<Output = DrmdlResult<()>> + Send;
}

/// Bento4 `mp4decrypt`.
pub struct Mp4Decrypt {
    program: PathBuf,
    timeout: Option<Duration>,
    diagnostic_limit: usize,
}

impl Mp4Decrypt {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            diagnostic_limit: 300,
        }
    }

    fn command(&self, keys: &[DecryptionKey], input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        for key in keys {
            command.arg("--key").arg(key.to_string());
        }
        command.arg(input).arg(output);
        command
    }
}

impl Decryptor for Mp4Decrypt {
    async fn decrypt(&self, keys: &[DecryptionKey], input: &Path, output: &Path) -> DrmdlResult<()> {
        let mut command = self.command(keys, input, output);
        run_decryptor(&mut command, output, self.timeout, self.diagnostic_limit).await
    }
}

/// Raw key decryption with shaka-packager.
pub struct ShakaPackager {
    program: PathBuf,
    timeout: Option<Duration>,
    diagnostic_limit: usize,
}

impl ShakaPackager {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            diagnostic_limit: 300,
        }
    }

    fn command(&self, keys: &[DecryptionKey], input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--quiet")
            .arg("--enable_raw_key_decryption")
            .arg({
                let mut str = OsString::new();
                str.push("input=");
                str.push(input.as_os_str());
                str.push(",stream=0,output=");
                str.push(output.as_os_str());
                str
            });

        for key in keys {
            command
                .arg("--keys")
                .arg(format!("key_id={}:key={}", key.key_id, key.key));
        }
        command
    }
}

impl Decryptor for ShakaPackager {
    async fn decrypt(&self, keys: &[DecryptionKey], input: &Path, output: &Path) -> DrmdlResult<()> {
        let mut command = self.command(keys, input, output);
        run_decryptor(&mut command, output, self.timeout, self.diagnostic_limit).await
    }
}

async fn run_decryptor(
    command: &mut Command,
    output: &Path,
    timeout: Option<Duration>,
    diagnostic_limit: usize,
) -> DrmdlResult<()> {
    let result = run_command(command, timeout)
        .await
        .map_err(|e| DrmdlError::Decryption(e.to_string()))?;
    if !result.success() {
        return Err(DrmdlError::Decryption(result.diagnostic(diagnostic_limit)));
    }

    // mp4decrypt exits 0 on some inputs it could not handle
    match tokio::fs::metadata(output).await {
        Ok(metadata) if metadata.len() > 0 => Ok(()),
        _ => Err(DrmdlError::Decryption(format!(
            "no output written to {}",
            output.display()
        ))),
    }
}

pub enum DecryptTool {
    Mp4Decrypt(Mp4Decrypt),
    ShakaPackager(ShakaPackager),
}

impl DecryptTool {
    pub fn from_config(config: &ToolsConfig) -> Self {
        match config.decryptor {
            DecryptorKind::Mp4decrypt => Self::Mp4Decrypt(Mp4Decrypt {
                program: config.mp4decrypt.clone(),
                timeout: config.timeout(),
                diagnostic_limit: config.diagnostic_limit,
            }),
            DecryptorKind::ShakaPackager => Self::ShakaPackager(ShakaPackager {
                program: config.packager.clone(),
                timeout: config.timeout(),
                diagnostic_limit: config.diagnostic_limit,
            }),
        }
    }
}

impl Decryptor for DecryptTool {
    async fn decrypt(&self, keys: &[DecryptionKey], input: &Path, output: &Path) -> DrmdlResult<()> {
        match self {
            Self::Mp4Decrypt(decryptor) => decryptor.decrypt(keys, input, output).await,
            Self::ShakaPackager(decryptor) => decryptor.decrypt(keys, input, output).await,
        }
    }
}
