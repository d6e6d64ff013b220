//! Storage service over PowerShell storage cmdlets and diskpart

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use isoboot_core::command::{args, command_line, CommandOutput, CommandRunner};
use isoboot_core::constants::{DATA_VOLUME_LABEL, EFI_VOLUME_LABEL};
use isoboot_core::types::{drive_root, drive_spec};
use isoboot_core::{AreaLog, Error, FilesystemFormat, Result};
use isoboot_deploy::mount::parse_drive_letter;

use super::StorageService;

/// Size of the data partition carved out of the system volume
pub const DATA_PARTITION_SIZE_MB: u64 = 10_000;

const SCRIPT_FILE: &str = "isoboot_diskpart.txt";

/// diskpart script that shrinks `C:` and creates the product partitions
pub fn diskpart_script(
    format: FilesystemFormat,
    efi_size_mb: u64,
    data_size_mb: u64,
    create_firmware: bool,
) -> String {
    let shrink = data_size_mb + if create_firmware { efi_size_mb } else { 0 };
    let mut script = String::new();
    script.push_str("select volume C\n");
    script.push_str(&format!("shrink desired={shrink} minimum={shrink}\n"));
    if create_firmware {
        script.push_str(&format!("create partition efi size={efi_size_mb}\n"));
        script.push_str(&format!(
            "format fs=fat32 quick label=\"{EFI_VOLUME_LABEL}\"\n"
        ));
    }
    script.push_str(&format!("create partition primary size={data_size_mb}\n"));
    script.push_str(&format!(
        "format fs={} quick label=\"{DATA_VOLUME_LABEL}\"\n",
        format.as_str().to_ascii_lowercase()
    ));
    script.push_str("exit\n");
    script
}

fn parse_number(output: &str) -> Option<u64> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|n| *n >= 0.0)
        .map(|n| n.round() as u64)
}

pub struct PowerShellStorage {
    runner: Arc<dyn CommandRunner>,
    powershell: String,
    required_efi_size_mb: u64,
    script_dir: PathBuf,
    log: AreaLog,
}

impl PowerShellStorage {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        powershell: impl Into<String>,
        required_efi_size_mb: u64,
        log: AreaLog,
    ) -> Self {
        Self {
            runner,
            powershell: powershell.into(),
            required_efi_size_mb,
            script_dir: std::env::temp_dir(),
            log,
        }
    }

    /// Directory the diskpart script is written to
    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = dir.into();
        self
    }

    fn exec(&self, program: &str, argv: &[String]) -> Result<CommandOutput> {
        let output = self.runner.run(program, argv)?;
        self.log.command(&command_line(program, argv), &output.text());
        Ok(output)
    }

    fn powershell(&self, script: &str) -> Result<CommandOutput> {
        debug!("powershell: {}", script);
        self.exec(
            &self.powershell,
            &args(["-NoProfile", "-NonInteractive", "-Command", script]),
        )
    }

    /// Run a mutation; a non-zero exit is a partition error for `operation`
    fn mutate(&self, operation: &str, script: &str) -> Result<()> {
        let output = self.powershell(script)?;
        if !output.success() {
            return Err(Error::partition(operation, output.text().trim()));
        }
        Ok(())
    }

    fn count_volumes(&self, label: &str) -> Result<usize> {
        let output = self.powershell(&format!(
            "@(Get-Volume -FileSystemLabel '{label}' -ErrorAction SilentlyContinue).Count"
        ))?;
        Ok(parse_number(&output.stdout).unwrap_or(0) as usize)
    }

    fn volume_root(&self, label: &str) -> Result<Option<PathBuf>> {
        let script = format!(
            "$p = Get-Volume -FileSystemLabel '{label}' -ErrorAction SilentlyContinue | \
             Select-Object -First 1 | Get-Partition; \
             if ($p -and -not $p.DriveLetter) {{ $p | Add-PartitionAccessPath -AssignDriveLetter; $p = $p | Get-Partition }}; \
             if ($p) {{ $p.DriveLetter }}"
        );
        let output = self.powershell(&script)?;
        Ok(parse_drive_letter(&output.stdout).map(drive_root))
    }

    fn reformat(&self, label: &str, filesystem: &str) -> Result<()> {
        info!("Formatting {} as {}", label, filesystem);
        self.mutate(
            &format!("format {label}"),
            &format!(
                "Get-Volume -FileSystemLabel '{label}' | Select-Object -First 1 | \
                 Format-Volume -FileSystem {filesystem} -NewFileSystemLabel '{label}' -Force -Confirm:$false | Out-Null"
            ),
        )
    }

    fn integrity_check(&self) -> Result<()> {
        let argv = args(["C:", "/scan"]);
        let output = self.exec("chkdsk", &argv)?;
        if !output.success() {
            return Err(Error::partition(
                "integrity check",
                format!("chkdsk reported problems on C: (exit {:?})", output.status),
            ));
        }
        Ok(())
    }
}

impl StorageService for PowerShellStorage {
    fn firmware_partition_count(&self) -> Result<usize> {
        self.count_volumes(EFI_VOLUME_LABEL)
    }

    fn firmware_partition_size_mb(&self) -> Result<Option<u64>> {
        let output = self.powershell(&format!(
            "$v = Get-Volume -FileSystemLabel '{EFI_VOLUME_LABEL}' -ErrorAction SilentlyContinue | Select-Object -First 1; \
             if ($v) {{ [math]::Round(($v | Get-Partition).Size / 1MB) }}"
        ))?;
        Ok(parse_number(&output.stdout))
    }

    fn data_partition_exists(&self) -> Result<bool> {
        Ok(self.count_volumes(DATA_VOLUME_LABEL)? > 0)
    }

    fn system_free_bytes(&self) -> Result<u64> {
        let output = self.powershell("(Get-Volume -DriveLetter C).SizeRemaining")?;
        parse_number(&output.stdout)
            .ok_or_else(|| Error::partition("query free space", output.text().trim()))
    }

    fn create_partitions(&self, format: FilesystemFormat, skip_integrity_check: bool) -> Result<()> {
        if skip_integrity_check {
            self.log.line("Integrity check skipped at user request");
        } else {
            self.integrity_check()?;
        }

        let create_firmware = self.firmware_partition_count()? == 0;
        let script = diskpart_script(
            format,
            self.required_efi_size_mb,
            DATA_PARTITION_SIZE_MB,
            create_firmware,
        );
        fs::create_dir_all(&self.script_dir)?;
        let script_path = self.script_dir.join(SCRIPT_FILE);
        fs::write(&script_path, &script)?;
        self.log.line(format!("diskpart script:\n{}", script));

        let argv = vec![String::from("/s"), script_path.display().to_string()];
        let output = self.exec("diskpart", &argv);
        if let Err(e) = fs::remove_file(&script_path) {
            debug!("Could not remove {}: {}", script_path.display(), e);
        }
        let output = output?;
        if !output.success() {
            return Err(Error::partition("create partitions", output.text().trim()));
        }

        if !self.data_partition_exists()? {
            return Err(Error::partition(
                "create partitions",
                format!("{} volume not found after diskpart", DATA_VOLUME_LABEL),
            ));
        }
        info!("Product partitions created");
        Ok(())
    }

    fn delete_partitions(&self) -> Result<()> {
        self.delete_product_volumes()?;
        if let Err(e) = self.extend_system_partition() {
            warn!("System partition not extended: {}", e);
        }
        Ok(())
    }

    fn reformat_data_partition(&self, format: FilesystemFormat) -> Result<()> {
        self.reformat(DATA_VOLUME_LABEL, format.as_str())
    }

    fn reformat_firmware_partition(&self) -> Result<()> {
        self.reformat(EFI_VOLUME_LABEL, FilesystemFormat::Fat32.as_str())
    }

    fn data_drive(&self) -> Result<Option<PathBuf>> {
        self.volume_root(DATA_VOLUME_LABEL)
    }

    fn firmware_drive(&self) -> Result<Option<PathBuf>> {
        self.volume_root(EFI_VOLUME_LABEL)
    }

    fn free_bytes(&self, root: &Path) -> Result<u64> {
        let spec = drive_spec(root);
        let letter = spec.trim_end_matches(':');
        let output = self.powershell(&format!("(Get-Volume -DriveLetter {letter}).SizeRemaining"))?;
        parse_number(&output.stdout)
            .ok_or_else(|| Error::partition("query free space", output.text().trim()))
    }

    fn delete_product_volumes(&self) -> Result<()> {
        self.mutate(
            "delete partitions",
            &format!(
                "Get-Volume -FileSystemLabel '{DATA_VOLUME_LABEL}','{EFI_VOLUME_LABEL}' -ErrorAction SilentlyContinue | \
                 Get-Partition | Remove-Partition -Confirm:$false"
            ),
        )?;
        let left = self.count_volumes(DATA_VOLUME_LABEL)? + self.count_volumes(EFI_VOLUME_LABEL)?;
        if left > 0 {
            return Err(Error::partition(
                "delete partitions",
                format!("{} product volumes still present", left),
            ));
        }
        Ok(())
    }

    fn extend_system_partition(&self) -> Result<()> {
        self.mutate(
            "extend system partition",
            "$max = (Get-PartitionSupportedSize -DriveLetter C).SizeMax; \
             Resize-Partition -DriveLetter C -Size $max -ErrorAction Stop",
        )
    }
}
