//! `xenomorph pivot` command: the full pipeline.
//!
//! build → verify → coordinate → terminate → prepare → pivot → exec.
//! Dry runs print the plan and touch nothing.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use xenomorph_core::config::{
    PipelineConfig, DEFAULT_CACHE_DIR, DEFAULT_EXEC, DEFAULT_OLD_ROOT, DEFAULT_TIMEOUT_SECS,
    DEFAULT_WORK_DIR,
};
use xenomorph_core::error::XenoError;
use xenomorph_runtime::{initsys, mounts, pivot, process, rootfs};

#[derive(Args)]
pub struct PivotArgs {
    /// Image reference, OCI layout directory, or tarball path
    pub image: Option<String>,

    /// Image reference (alternative to the positional form)
    #[arg(long = "image", value_name = "REF")]
    pub image_opt: Option<String>,

    /// Command executed in the new root after the pivot
    #[arg(long, default_value = DEFAULT_EXEC)]
    pub exec: String,

    /// Mount point for the old root inside the new root
    #[arg(long = "keep-old-root", value_name = "PATH", default_value = DEFAULT_OLD_ROOT)]
    pub keep_old_root: String,

    /// Tear down the old root after the pivot instead of keeping it
    #[arg(long = "no-keep-old-root")]
    pub no_keep_old_root: bool,

    /// Skip the interactive confirmation prompt
    #[arg(short, long)]
    pub force: bool,

    /// Deadline in seconds for service shutdown and init quiescence
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Skip init system coordination entirely
    #[arg(long = "no-init-coord")]
    pub no_init_coord: bool,

    /// Skip new-root verification
    #[arg(long = "skip-verify")]
    pub skip_verify: bool,

    /// OCI blob cache directory
    #[arg(long = "cache-dir", value_name = "PATH", default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: PathBuf,

    /// Directory where the new root filesystem is materialized
    #[arg(long = "work-dir", value_name = "PATH", default_value = DEFAULT_WORK_DIR)]
    pub work_dir: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the planned steps and exit without side effects
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Arguments appended to the exec command
    #[arg(last = true)]
    pub exec_args: Vec<String>,
}

impl PivotArgs {
    /// Resolve the parsed arguments into a validated pipeline
    /// configuration.
    pub(crate) fn into_config(self) -> Result<PipelineConfig, XenoError> {
        let image = self
            .image
            .or(self.image_opt)
            .ok_or_else(|| XenoError::Config("image reference is required".to_string()))?;

        let config = PipelineConfig {
            image,
            exec_cmd: self.exec,
            exec_args: self.exec_args,
            old_root_mount: self.keep_old_root,
            keep_old_root: !self.no_keep_old_root,
            force: self.force,
            timeout_secs: self.timeout,
            skip_init_coord: self.no_init_coord,
            skip_verify: self.skip_verify,
            cache_dir: self.cache_dir,
            work_dir: self.work_dir,
            dry_run: self.dry_run,
        };

        config.validate()?;
        Ok(config)
    }
}

pub fn execute(args: PivotArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.into_config()?;

    if config.dry_run {
        for line in render_plan(&config) {
            println!("{line}");
        }
        return Ok(());
    }

    ensure_root()?;

    if !config.force && !confirm()? {
        info!("aborted by user");
        return Ok(());
    }

    run_pipeline(&config)?;
    Ok(())
}

/// The pipeline refuses to run without euid 0: mount, unshare,
/// pivot_root, and signalling arbitrary pids all need it.
fn ensure_root() -> Result<(), XenoError> {
    if !nix::unistd::Uid::effective().is_root() {
        return Err(XenoError::Config(
            "must run as root (CAP_SYS_ADMIN is required for mount and pivot_root)".to_string(),
        ));
    }
    Ok(())
}

/// Last chance to abort before anything happens.
fn confirm() -> io::Result<bool> {
    print!("This will replace the running root filesystem. Continue? [y/N] ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes" | "Yes" | "YES"))
}

/// Render the numbered execution plan shown by `--dry-run`.
pub(crate) fn render_plan(config: &PipelineConfig) -> Vec<String> {
    let exec_line = if config.exec_args.is_empty() {
        config.exec_cmd.clone()
    } else {
        format!("{} {}", config.exec_cmd, config.exec_args.join(" "))
    };

    vec![
        format!("Planned steps for image '{}':", config.image),
        "  1. Estimate image size and check available memory".to_string(),
        format!("  2. Mount a sized tmpfs at {}", config.work_dir.display()),
        format!("  3. Build the new root filesystem from '{}'", config.image),
        if config.skip_verify {
            "  4. Verify the new root filesystem (skipped)".to_string()
        } else {
            "  4. Verify the new root filesystem".to_string()
        },
        if config.skip_init_coord {
            "  5. Coordinate the init system into rescue mode (skipped)".to_string()
        } else {
            format!(
                "  5. Coordinate the init system into rescue mode (timeout {}s)",
                config.timeout_secs
            )
        },
        "  6. Terminate non-essential processes (SIGTERM, then SIGKILL)".to_string(),
        "  7. Prepare: unshare mount namespace, make / private, mount /dev /proc /sys /run"
            .to_string(),
        format!(
            "  8. pivot_root into {} (old root at {}{})",
            config.work_dir.display(),
            config.old_root_mount,
            if config.keep_old_root {
                ""
            } else {
                ", torn down after pivot"
            }
        ),
        format!("  9. Exec '{exec_line}'"),
    ]
}

/// Run the pipeline for real. Only returns on failure or when no exec
/// command is configured.
fn run_pipeline(config: &PipelineConfig) -> Result<(), XenoError> {
    // Stage 1: size the build and make sure it fits in memory.
    let estimate = rootfs::estimate_image_size(&config.image)?;
    rootfs::check_available_memory(estimate)?;
    info!(estimate, "image size estimated");

    // Stage 2: back the work dir with a tmpfs sized to the estimate.
    mounts::mount_tmpfs(&config.work_dir, estimate)?;

    // Stage 3: materialize the new root.
    let build = rootfs::build(&config.image, &config.work_dir, &rootfs::BuildOptions::default())?;
    info!(
        layers = build.layer_count,
        total_size = build.total_size,
        "rootfs materialized"
    );

    // Stage 4: verify before anything destructive.
    if !config.skip_verify {
        let report = rootfs::verify(&config.work_dir);
        for warning in &report.warnings {
            warn!("{warning}");
        }
        if !report.valid {
            return Err(XenoError::PreparationFailed(report.errors.join("; ")));
        }
    }

    // Stage 5: advisory init coordination.
    if config.skip_init_coord {
        info!("init coordination skipped by request");
    } else if initsys::running_in_container() {
        info!("container detected; skipping init coordination");
    } else {
        coordinate(Duration::from_secs(config.timeout_secs));
    }

    // Stage 6: the authoritative stopper.
    let result = process::terminate_all(&process::TerminateOptions::default())?;
    info!(
        terminated = result.terminated_count,
        killed = result.killed_count,
        "process termination complete"
    );
    if !result.stubborn_pids.is_empty() {
        warn!(stubborn = ?result.stubborn_pids, "some processes survived SIGKILL");
    }

    // Stage 7: prepare the mount namespace and the new root.
    let prepared = pivot::prepare(
        &config.work_dir,
        &pivot::PrepareOptions {
            skip_verify: config.skip_verify,
            create_namespace: true,
        },
    )?;

    // Stages 8-9: the commit point. Does not return on success.
    pivot::execute(&pivot::PivotConfig {
        new_root: prepared.new_root,
        old_root_mount: config.old_root_relative().to_string(),
        exec_cmd: Some(config.exec_cmd.clone()),
        exec_args: config.exec_args.clone(),
        keep_old_root: config.keep_old_root,
    })
}

/// Detect the init system and drive it toward quiescence. Every
/// failure here is downgraded: termination is what actually stops
/// userland.
fn coordinate(timeout: Duration) {
    let info = initsys::detect();
    info!(
        system = %info.system,
        pid1 = %info.pid1_comm,
        version = info.version.as_deref().unwrap_or("-"),
        "coordinating init system"
    );

    let coordinator = initsys::Coordinator::new(info, timeout);
    if let Err(e) = coordinator.enter_rescue_mode() {
        warn!(error = %e, "rescue transition failed");
    }
    if let Err(e) = coordinator.stop_all_services() {
        warn!(error = %e, "service stop failed");
    }
    if let Err(e) = coordinator.wait_for_quiescence() {
        warn!(error = %e, "init system did not quiesce");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> PivotArgs {
        PivotArgs {
            image: Some("alpine:latest".to_string()),
            image_opt: None,
            exec: DEFAULT_EXEC.to_string(),
            keep_old_root: DEFAULT_OLD_ROOT.to_string(),
            no_keep_old_root: false,
            force: false,
            timeout: DEFAULT_TIMEOUT_SECS,
            no_init_coord: false,
            skip_verify: false,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            verbose: false,
            dry_run: false,
            exec_args: Vec::new(),
        }
    }

    #[test]
    fn test_into_config_defaults() {
        let config = base_args().into_config().unwrap();
        assert_eq!(config.image, "alpine:latest");
        assert_eq!(config.exec_cmd, "/bin/sh");
        assert_eq!(config.old_root_mount, "/mnt/oldroot");
        assert!(config.keep_old_root);
    }

    #[test]
    fn test_into_config_image_flag_fallback() {
        let mut args = base_args();
        args.image = None;
        args.image_opt = Some("nginx:1.25".to_string());
        let config = args.into_config().unwrap();
        assert_eq!(config.image, "nginx:1.25");
    }

    #[test]
    fn test_into_config_missing_image() {
        let mut args = base_args();
        args.image = None;
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_into_config_zero_timeout_rejected() {
        let mut args = base_args();
        args.timeout = 0;
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_into_config_no_keep_old_root() {
        let mut args = base_args();
        args.no_keep_old_root = true;
        let config = args.into_config().unwrap();
        assert!(!config.keep_old_root);
    }

    #[test]
    fn test_render_plan_has_nine_steps() {
        let config = base_args().into_config().unwrap();
        let plan = render_plan(&config);

        // Header plus nine numbered steps.
        assert_eq!(plan.len(), 10);
        for (index, line) in plan.iter().skip(1).enumerate() {
            assert!(
                line.trim_start().starts_with(&format!("{}.", index + 1)),
                "step {line:?} is misnumbered"
            );
        }
    }

    #[test]
    fn test_render_plan_marks_skipped_stages() {
        let mut args = base_args();
        args.skip_verify = true;
        args.no_init_coord = true;
        let config = args.into_config().unwrap();

        let plan = render_plan(&config).join("\n");
        assert!(plan.contains("Verify the new root filesystem (skipped)"));
        assert!(plan.contains("rescue mode (skipped)"));
    }

    #[test]
    fn test_render_plan_includes_exec_args() {
        let mut args = base_args();
        args.exec_args = vec!["-c".to_string(), "echo PIVOT_SUCCESS".to_string()];
        let config = args.into_config().unwrap();

        let plan = render_plan(&config).join("\n");
        assert!(plan.contains("/bin/sh -c echo PIVOT_SUCCESS"));
    }
}
