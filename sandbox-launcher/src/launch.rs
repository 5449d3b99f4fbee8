/*
 * pacwrap
 *
 * Copyright (C) 2023-2024 Xavier Moffett <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Top-level launch orchestration (C9): resolves a ref to a fully composed
//! `bwrap` invocation and execs it. Drives every other component in this
//! crate in the fixed order the sandbox's safety properties depend on —
//! context before exposure, exposure before the final arg stream, sockets
//! and the ld cache only once the base args exist.

use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
    process::Command,
    thread,
};

use command_fds::{CommandFdExt, FdMapping};
use sandbox_core::{
    appinfo::{self, AppInstance},
    constants::{BWRAP_EXECUTABLE, DEFAULT_PATH, PRESERVED_ENV_VARS, STRIPPED_ENV_VARS, UID, XDG_CACHE_HOME, XDG_RUNTIME_DIR},
    context::{
        caps::{CapSet, Devices, Shares},
        Context,
    },
    deploy::DeployStore,
    err,
    error,
    exec::{
        args::ArgStream,
        seccomp::{self, SeccompParams},
        utils::wait_on_executor,
    },
    exposure,
    extensions::{self, ExtensionBind},
    impl_error,
    ldcache,
    log::{Level::Info, Logger},
    utils::TermControl,
    Error,
    ErrorGeneric,
    ErrorKind,
    Result,
};

use crate::{
    forwarding::{self, DocumentPortal},
    instance::AppPaths,
    refs::AppRef,
    sockets,
};

#[derive(Debug)]
pub enum LaunchError {
    MissingRuntimeRef,
}

impl_error!(LaunchError);

impl Display for LaunchError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRuntimeRef => write!(fmter, "app metadata does not declare a runtime and none was supplied."),
        }
    }
}

/// Everything the CLI front-end gathers before a launch can begin.
pub struct LaunchRequest<'a> {
    pub app_ref: &'a str,
    pub runtime_ref_override: Option<&'a str>,
    pub extra_context: Context,
    pub command: Vec<String>,
    pub background: bool,
}

/// The systemd user session is an external collaborator (§4.10 step 12);
/// placing the launched process in a transient cgroup scope is best-effort
/// and never aborts the launch when it fails.
pub trait SessionScope {
    fn place_in_scope(&self, app_id: &str, pid: i32) -> std::result::Result<(), String>;
}

pub struct NullScope;

impl SessionScope for NullScope {
    fn place_in_scope(&self, _app_id: &str, _pid: i32) -> std::result::Result<(), String> {
        Err("no session bus connection configured".to_string())
    }
}

pub fn launch(
    deploy: &dyn DeployStore,
    portal: &dyn DocumentPortal,
    scope: &dyn SessionScope,
    logger: &mut Logger,
    request: LaunchRequest,
) -> Result<()> {
    // 1. Decompose the ref, load app + runtime deploy data.
    let app_ref = AppRef::parse(request.app_ref)?;
    logger.log(Info, &format!("Launching {app_ref}")).ok();
    let app = deploy.resolve_app(request.app_ref).generic()?;
    let runtime_ref = request
        .runtime_ref_override
        .map(str::to_string)
        .or_else(|| read_declared_runtime(&app.metadata))
        .ok_or(())
        .or_else(|_| err!(LaunchError::MissingRuntimeRef))?;
    let runtime = deploy.resolve_runtime(&runtime_ref).generic()?;
    logger.log(Info, &format!("Resolved runtime {runtime_ref} (commit {})", runtime.commit)).ok();

    // 2. Context: defaults -> runtime metadata -> app metadata -> overrides -> CLI.
    let mut ctx = Context::defaults();
    ctx.merge(&Context::parse(&runtime.metadata).generic()?);
    ctx.merge(&Context::parse(&app.metadata).generic()?);

    if let Some(raw) = deploy.load_overrides(&app_ref.id).generic()? {
        ctx.merge(&Context::load_overrides(&raw).generic()?);
    }

    ctx.merge(&request.extra_context);

    // 3. Per-app data directory.
    let paths = AppPaths::resolve(&app_ref.id)?;

    // 4. Seed the arg stream with runtime/app binds and extension mounts.
    let mut args = ArgStream::new();
    args.add("--ro-bind", &[&runtime.files_path.to_string_lossy(), "/usr"]);
    args.add("--lock-file", &["/usr/.ref"]);
    args.add("--ro-bind", &[&app.files_path.to_string_lossy(), "/app"]);
    args.add("--lock-file", &["/app/.ref"]);

    let runtime_summary = extensions::mount(&runtime.extensions).summary;
    let app_summary = extensions::mount(&app.extensions).summary;

    let mut all_extensions = runtime.extensions.clone();
    all_extensions.extend(app.extensions.iter().cloned());
    let mount_plan = extensions::mount(&all_extensions);
    emit_extension_binds(&mut args, &mount_plan.binds);

    // 5. Decide whether an ld.so.conf overlay is needed.
    let ld_conf_path = runtime.files_path.join("etc/ld.so.conf");
    let needs_ld_conf_overlay = std::fs::metadata(&ld_conf_path).map(|m| m.is_file() && m.len() == 0).unwrap_or(false);

    if needs_ld_conf_overlay {
        let blob = sandbox_core::configblobs::ld_so_conf_blob();
        args.add_data("ld-so-conf", blob.as_bytes(), "/etc/ld.so.conf").generic()?;
    }

    // 6. LdCache lookup or regeneration.
    let key = ldcache::cache_key(Some(&app.commit), &runtime.commit, &app_summary, &runtime_summary);
    let cache_dir = ldcache::cache_dir(Some(&paths.data), &*XDG_CACHE_HOME);
    let ld_cache_fd = match ldcache::lookup(&cache_dir, &key) {
        Some(fd) => {
            logger.log(Info, &format!("ld.so.cache hit for key {key}")).ok();
            fd
        }
        None => {
            logger.log(Info, &format!("Regenerating ld.so.cache for key {key}")).ok();
            let mut ld_args = args.arguments().to_vec();
            ld_args.extend(["--unshare-pid".to_string(), "--unshare-ipc".to_string(), "--unshare-net".to_string()]);
            ld_args.extend(["--proc".to_string(), "/proc".to_string()]);
            ld_args.extend(["--dev".to_string(), "/dev".to_string()]);
            ld_args.extend(["--bind".to_string(), cache_dir.to_string_lossy().into_owned(), "/run/ld-so-cache-dir".to_string()]);
            ldcache::regenerate(BWRAP_EXECUTABLE, &ld_args, &cache_dir, &key, true).generic()?
        }
    };

    // 7. Base sandbox args.
    apply_base_args(&mut args, &paths, &ctx);

    let seccomp_params = SeccompParams::from_context(&ctx, None);
    let (sec_reader, sec_writer) = os_pipe::pipe().generic()?;
    let sec_fd = seccomp::build(&seccomp_params, &sec_reader, sec_writer).generic()?;
    args.add_fd_only("--seccomp", sec_fd);

    // 8. Attach ld.so.cache + AppInfo + document portal + exposure plan.
    args.add_fd("--ro-bind-data", ld_cache_fd, "/etc/ld.so.cache");

    let instance = AppInstance {
        name: &app_ref.id,
        app_ref: &app_ref.to_string(),
        app_path: Some(&app.files_path.to_string_lossy()),
        app_commit: Some(&app.commit),
        runtime_ref: &runtime_ref,
        runtime_path: &runtime.files_path.to_string_lossy(),
        runtime_commit: &runtime.commit,
        extensions_summary: &mount_plan.summary,
        branch: &app_ref.branch,
        session_bus_proxy: !ctx.sockets.is_granted(sandbox_core::context::caps::Sockets::SESSION_BUS),
        system_bus_proxy: !ctx.sockets.is_granted(sandbox_core::context::caps::Sockets::SYSTEM_BUS),
        context: &ctx,
    };
    let info_handles = appinfo::materialize(&instance).generic()?;
    args.add_fd("--file", info_handles.file_fd, "/.flatpak-info");
    args.add("--symlink", &[appinfo::symlink_target(), &format!("/run/user/{}/flatpak-info", *UID)]);

    let doc_mount = format!("/run/user/{}/doc", *UID);
    args.add("--tmpfs", &[&doc_mount]);

    let plan = exposure::plan(&ctx, Some(&paths.data)).generic()?;

    for (path, entry) in plan.render_sorted() {
        emit_exposure(&mut args, &path, &entry);
    }

    // 9/10. Apply socket grants; each bus proxy launched inline, sync fd wired
    // into the arg stream, parent's write end of its pipe already closed.
    let socket_outcome = sockets::apply(&ctx, &app_ref.id, info_handles.bind_data_fd, &mut args);

    let mut env_vars = base_env_vars(&ctx, &paths);
    env_vars.extend(socket_outcome.env);

    // 11. Re-inject LD_LIBRARY_PATH, stripped from the executor's own env.
    if let Ok(ld_path) = std::env::var("LD_LIBRARY_PATH") {
        if !ld_path.is_empty() {
            args.add("--setenv", &["LD_LIBRARY_PATH", &ld_path]);
        }
    }

    for (name, value) in &env_vars {
        args.add("--setenv", &[name, value]);
    }

    // Forward the caller's positional command, rewriting document-portal toggles.
    let command = forwarding::rewrite_args(&request.command, &plan, portal, &doc_mount);

    // 13. Serialize and exec.
    let (raw_args, fds) = args.into_parts();
    let arg_blob = serialize_args(&raw_args);
    let arg_fd = sandbox_core::exec::args::create_sealed_blob("bwrap-args", &arg_blob).generic()?;

    let term = TermControl::new(0);
    let mut command_line = Command::new(BWRAP_EXECUTABLE);
    command_line.env_clear();

    let mut mappings: Vec<FdMapping> = fds.iter().map(|fd| FdMapping { parent_fd: *fd, child_fd: *fd }).collect();
    mappings.push(FdMapping { parent_fd: arg_fd, child_fd: arg_fd });

    command_line.arg("--args").arg(arg_fd.to_string()).args(&command);
    command_line.fd_mappings(mappings).generic()?;

    logger.log(Info, &format!("Invoking {BWRAP_EXECUTABLE} for {app_ref}")).ok();

    match command_line.spawn() {
        Ok(child) => {
            let bwrap_pid = child.id() as i32;

            // 12. Best-effort cgroup placement; a failure only warrants a warning.
            if scope.place_in_scope(&app_ref.id, bwrap_pid).is_err() {
                logger.log(Info, "transient unit placement unavailable").ok();
                error!(ErrorKind::Message("transient unit placement unavailable")).warn();
            }

            wait_on_executor(child, term, bwrap_pid, request.background, Some(socket_outcome.proxies), trap_signals, || Ok(()))
        }
        Err(error) => err!(ErrorKind::ProcessInitFailure(BWRAP_EXECUTABLE, error.kind())),
    }
}

fn read_declared_runtime(app_metadata: &str) -> Option<String> {
    let doc = sandbox_core::context::ini::IniDocument::parse(app_metadata);
    doc.group("Application").and_then(|group| group.get("runtime")).map(|runtime| format!("runtime/{runtime}"))
}

fn emit_extension_binds(args: &mut ArgStream, binds: &[ExtensionBind]) {
    for bind in binds {
        match bind {
            ExtensionBind::Tmpfs(path) => args.add("--tmpfs", &[&path.to_string_lossy()]),
            ExtensionBind::ReadOnly(src, dst) => args.add("--ro-bind", &[&src.to_string_lossy(), &dst.to_string_lossy()]),
            ExtensionBind::LockFile(path) => args.add("--lock-file", &[&path.to_string_lossy()]),
            ExtensionBind::LdConfigFragment(path, contents) => {
                let _ = args.add_data("ld-fragment", contents.as_bytes(), &path.to_string_lossy());
            }
            ExtensionBind::LdLibraryPathPrepend(_) | ExtensionBind::LdLibraryPathAppend(_) => {}
            ExtensionBind::Symlink(link, target) => args.add("--symlink", &[&target.to_string_lossy(), &link.to_string_lossy()]),
        }
    }
}

fn apply_base_args(args: &mut ArgStream, paths: &AppPaths, ctx: &Context) {
    args.add("--unshare-pid", &[]);

    if !ctx.shares.is_granted(Shares::IPC) {
        args.add("--unshare-ipc", &[]);
    }

    if !ctx.shares.is_granted(Shares::NETWORK) {
        args.add("--unshare-net", &[]);
    }

    args.add("--proc", &["/proc"]);
    apply_device_args(args, &ctx.devices);
    args.add("--tmpfs", &["/tmp"]);
    args.add("--tmpfs", &["/var/tmp"]);
    args.add("--bind", &[&*XDG_RUNTIME_DIR, &*XDG_RUNTIME_DIR]);
    args.add("--ro-bind", &["/sys/block", "/sys/block"]);
    args.add("--ro-bind", &["/sys/bus", "/sys/bus"]);
    args.add("--ro-bind", &["/sys/class", "/sys/class"]);
    args.add("--ro-bind", &["/sys/dev", "/sys/dev"]);
    args.add("--ro-bind", &["/sys/devices", "/sys/devices"]);

    let passwd = sandbox_core::configblobs::passwd_blob();
    let group = sandbox_core::configblobs::group_blob();
    let _ = args.add_data("passwd", passwd.as_bytes(), "/etc/passwd");
    let _ = args.add_data("group", group.as_bytes(), "/etc/group");

    if Path::new("/etc/machine-id").exists() {
        args.add("--ro-bind", &["/etc/machine-id", "/etc/machine-id"]);
    }

    for (host_path, sandbox_path) in [("/etc/localtime", "/etc/localtime"), ("/etc/resolv.conf", "/etc/resolv.conf"), ("/etc/hosts", "/etc/hosts")] {
        if Path::new(host_path).exists() {
            args.add("--ro-bind", &[host_path, sandbox_path]);
        }
    }

    for (dir, sandbox_rel) in [("cache", "var/cache"), ("data", "var/data"), ("config", "var/config"), ("cache/tmp", "var/tmp")] {
        let host_dir = paths.root.join(dir);
        args.add("--bind", &[&host_dir.to_string_lossy(), &format!("/{sandbox_rel}")]);
    }

    for link in ["lib", "lib32", "lib64", "bin", "sbin"] {
        args.add("--symlink", &[&format!("/usr/{link}"), &format!("/{link}")]);
    }
}

/// `--device=`/`--nodevice=` translation (§3 Devices, §4.10 step 7). `all`
/// replaces the restricted `/dev` devtmpfs with a direct bind of the host's;
/// otherwise `dri`/`kvm` bind-try their specific device nodes on top of it.
fn apply_device_args(args: &mut ArgStream, devices: &CapSet<Devices>) {
    if devices.is_granted(Devices::ALL) {
        args.add("--dev-bind", &["/dev", "/dev"]);
        return;
    }

    args.add("--dev", &["/dev"]);

    if devices.is_granted(Devices::DRI) {
        for dev in host_gpu_devices() {
            args.add("--dev-bind-try", &[&dev, &dev]);
        }
    }

    if devices.is_granted(Devices::KVM) {
        args.add("--dev-bind-try", &["/dev/kvm", "/dev/kvm"]);
    }
}

/// Host `/dev` entries the `dri` device grant exposes: the DRM render/control
/// directory plus any proprietary nvidia device nodes alongside it.
fn host_gpu_devices() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/dev") else { return Vec::new() };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            (name == "dri" || name.starts_with("nvidia")).then(|| format!("/dev/{name}"))
        })
        .collect()
}

fn emit_exposure(args: &mut ArgStream, path: &Path, entry: &exposure::Exposure) {
    let display = path.to_string_lossy().into_owned();

    match entry {
        exposure::Exposure::Bind(mode) => {
            let op = if matches!(mode, sandbox_core::context::fsmode::FsMode::ReadOnly) { "--ro-bind" } else { "--bind" };
            args.add(op, &[&display, &display]);
        }
        exposure::Exposure::Dir => args.add("--dir", &[&display]),
        exposure::Exposure::Tmpfs => args.add("--tmpfs", &[&display]),
        exposure::Exposure::Symlink(target) => args.add("--symlink", &[&target.to_string_lossy(), &display]),
    }
}

fn base_env_vars(ctx: &Context, paths: &AppPaths) -> Vec<(String, String)> {
    let mut vars = vec![
        ("PATH".to_string(), DEFAULT_PATH.to_string()),
        ("XDG_CONFIG_DIRS".to_string(), "/app/etc/xdg:/etc/xdg".to_string()),
        ("XDG_DATA_DIRS".to_string(), "/app/share:/usr/share".to_string()),
        ("SHELL".to_string(), sandbox_core::constants::DEFAULT_SHELL.to_string()),
        ("XDG_DATA_HOME".to_string(), paths.data.to_string_lossy().into_owned()),
        ("XDG_CONFIG_HOME".to_string(), paths.config.to_string_lossy().into_owned()),
        ("XDG_CACHE_HOME".to_string(), paths.cache.to_string_lossy().into_owned()),
    ];

    for name in PRESERVED_ENV_VARS.iter() {
        if let Ok(value) = std::env::var(name) {
            vars.push((name.to_string(), value));
        }
    }

    for (name, value) in &ctx.env_vars {
        vars.push((name.clone(), value.clone()));
    }

    for name in STRIPPED_ENV_VARS.iter() {
        vars.retain(|(n, _)| n.as_str() != *name);
    }

    vars
}

fn serialize_args(args: &[String]) -> Vec<u8> {
    let mut blob = Vec::new();

    for arg in args {
        blob.extend_from_slice(arg.as_bytes());
        blob.push(0);
    }

    blob
}

fn trap_signals(bwrap_pid: i32) {
    let Ok(mut signals) = signal_hook::iterator::Signals::new(signal_hook::consts::TERM_SIGNALS) else { return };

    thread::Builder::new()
        .name("sandbox-launcher-signal".to_string())
        .spawn(move || {
            let proc = Path::new("/proc").join(bwrap_pid.to_string());

            for _ in signals.forever() {
                if proc.exists() {
                    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(bwrap_pid), nix::sys::signal::Signal::SIGKILL);
                }
            }
        })
        .ok();
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn declared_runtime_reads_application_group() {
        let metadata = "[Application]\nruntime=org.example.Runtime/x86_64/stable\n";
        assert_eq!(read_declared_runtime(metadata), Some("runtime/org.example.Runtime/x86_64/stable".to_string()));
    }

    #[test]
    fn declared_runtime_absent_without_group() {
        assert_eq!(read_declared_runtime(""), None);
    }

    #[test]
    fn null_scope_always_reports_unavailable() {
        assert!(NullScope.place_in_scope("org.example.App", 1234).is_err());
    }

    #[test]
    fn serialize_args_nul_separates_entries() {
        let blob = serialize_args(&["--ro-bind".to_string(), "/usr".to_string(), "/usr".to_string()]);
        assert_eq!(blob, b"--ro-bind\0/usr\0/usr\0");
    }

    fn dummy_paths() -> AppPaths {
        AppPaths {
            root: PathBuf::from("/tmp/sandbox-launcher-test/root"),
            data: PathBuf::from("/tmp/sandbox-launcher-test/root/data"),
            cache: PathBuf::from("/tmp/sandbox-launcher-test/root/cache"),
            cache_fontconfig: PathBuf::from("/tmp/sandbox-launcher-test/root/cache/fontconfig"),
            cache_tmp: PathBuf::from("/tmp/sandbox-launcher-test/root/cache/tmp"),
            config: PathBuf::from("/tmp/sandbox-launcher-test/root/config"),
        }
    }

    #[test]
    fn empty_context_unshares_ipc_and_net_and_has_dev() {
        let mut args = ArgStream::new();
        apply_base_args(&mut args, &dummy_paths(), &Context::default());
        let rendered = args.arguments();
        assert!(rendered.iter().any(|a| a == "--unshare-ipc"));
        assert!(rendered.iter().any(|a| a == "--unshare-net"));
        assert!(rendered.windows(2).any(|w| w[0] == "--dev" && w[1] == "/dev"));
        assert!(rendered.iter().all(|a| !a.starts_with("--share=")));
    }

    #[test]
    fn network_share_keeps_ipc_unshared_but_not_net() {
        let mut ctx = Context::default();
        ctx.shares.grant(Shares::NETWORK);

        let mut args = ArgStream::new();
        apply_base_args(&mut args, &dummy_paths(), &ctx);
        let rendered = args.arguments();
        assert!(rendered.iter().any(|a| a == "--unshare-ipc"));
        assert!(!rendered.iter().any(|a| a == "--unshare-net"));
    }

    #[test]
    fn device_all_replaces_restricted_devtmpfs() {
        let mut devices = CapSet::<Devices>::new();
        devices.grant(Devices::ALL);

        let mut args = ArgStream::new();
        apply_device_args(&mut args, &devices);
        let rendered = args.arguments();
        assert!(rendered.windows(2).any(|w| w[0] == "--dev-bind" && w[1] == "/dev"));
        assert!(!rendered.iter().any(|a| a == "--dev"));
    }

    #[test]
    fn device_kvm_adds_bind_try_on_top_of_devtmpfs() {
        let mut devices = CapSet::<Devices>::new();
        devices.grant(Devices::KVM);

        let mut args = ArgStream::new();
        apply_device_args(&mut args, &devices);
        let rendered = args.arguments();
        assert!(rendered.iter().any(|a| a == "--dev"));
        assert!(rendered.windows(2).any(|w| w[0] == "--dev-bind-try" && w[1] == "/dev/kvm"));
    }

    #[test]
    fn no_device_grants_emit_only_devtmpfs() {
        let mut args = ArgStream::new();
        apply_device_args(&mut args, &CapSet::<Devices>::new());
        let rendered = args.arguments();
        assert!(rendered.windows(2).any(|w| w[0] == "--dev" && w[1] == "/dev"));
        assert!(!rendered.iter().any(|a| a.starts_with("--dev-bind")));
    }
}
