// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::env::set_current_dir;
use std::fs::{copy, create_dir_all, remove_dir, remove_file, set_permissions, write, Permissions};
use std::io;
use std::os::fd::IntoRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicI32, Ordering};

use nix::libc::SIGCHLD;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{clone, CloneFlags};
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, getegid, geteuid, getgid, getuid, pipe, pivot_root, read, sethostname, setgid, setuid};
use nix::unistd::{Gid, Pid, Uid};
use thiserror::Error;

pub mod caps;
pub mod profile;

pub use self::caps::{Capability, CapabilitySet};
pub use self::profile::{FilterAction, Policy, Profile, RunAs, SyscallFilter, SyscallRule};

/// Flags applied to one entry of the mount table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountFlags(u32);

impl MountFlags {
    pub const BIND: Self = Self(1 << 0);
    pub const RECURSIVE: Self = Self(1 << 1);
    pub const READONLY: Self = Self(1 << 2);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MountFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One host path made visible inside the container
#[derive(Debug, Clone)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
    pub flags: MountFlags,
}

impl Mount {
    pub fn bind(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            flags: MountFlags::BIND,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.flags = self.flags | MountFlags::READONLY;
        self
    }

    pub fn recursive(mut self) -> Self {
        self.flags = self.flags | MountFlags::RECURSIVE;
        self
    }
}

/// Container configuration assembled before [`Container::create`]
#[derive(Debug, Clone, Default)]
pub struct Options {
    mounts: Vec<Mount>,
    networking: bool,
    hostname: Option<String>,
    work_dir: Option<PathBuf>,
    profile: Option<Profile>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn networking(self, enabled: bool) -> Self {
        Self {
            networking: enabled,
            ..self
        }
    }

    pub fn hostname(self, hostname: impl ToString) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            ..self
        }
    }

    pub fn work_dir(self, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: Some(work_dir.into()),
            ..self
        }
    }

    pub fn profile(self, profile: Profile) -> Self {
        Self {
            profile: Some(profile),
            ..self
        }
    }
}

/// Options for one process run inside the container
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub arguments: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    pub flags: SpawnFlags,
}

impl SpawnOptions {
    pub fn args<S: ToString>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.arguments.extend(args.into_iter().map(|s| s.to_string()));
        self
    }

    pub fn env(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.environment.push((key.to_string(), value.to_string()));
        self
    }

    pub fn envs<K: ToString, V: ToString>(mut self, envs: impl IntoIterator<Item = (K, V)>) -> Self {
        self.environment
            .extend(envs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn wait(mut self) -> Self {
        self.flags = self.flags | SpawnFlags::WAIT;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnFlags(u32);

impl SpawnFlags {
    /// Block until the process finishes, surfacing its exit status
    pub const WAIT: Self = Self(1 << 0);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SpawnFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// An isolated execution environment over a prepared rootfs.
///
/// Each spawned process runs in fresh mount / pid / ipc / uts (and
/// optionally user + net) namespaces with the rootfs pivoted to `/`,
/// so nothing a process mounts or writes outside bind targets survives
/// it. Destruction reaps any processes still running.
pub struct Container {
    root: PathBuf,
    options: Options,
    policy: Policy,
    children: Vec<Pid>,
    script_count: usize,
    destroyed: bool,
}

impl Container {
    /// Validate `options` and take ownership of the prepared rootfs
    pub fn create(root: impl Into<PathBuf>, options: Options) -> Result<Self, Error> {
        let root = root.into().canonicalize()?;

        let policy = match &options.profile {
            Some(profile) => profile.compose(Policy::default())?,
            None => Policy::default(),
        };

        Ok(Self {
            root,
            options,
            policy,
            children: vec![],
            script_count: 0,
            destroyed: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `path` inside the container. With [`SpawnFlags::WAIT`] this
    /// blocks and a non-zero exit surfaces as [`ExecError`]; otherwise
    /// the process keeps running until it exits or the container is
    /// destroyed.
    pub fn spawn(&mut self, path: impl Into<PathBuf>, options: SpawnOptions) -> Result<Option<Pid>, Error> {
        if self.destroyed {
            return Err(Error::Destroyed);
        }

        let wait = options.flags.contains(SpawnFlags::WAIT);
        let pid = self.enter(path.into(), options)?;

        if !wait {
            self.children.push(pid);
            return Ok(Some(pid));
        }

        forward_sigint(pid)?;

        let result = match waitpid(pid, None)? {
            WaitStatus::Exited(_, 0) => Ok(None),
            WaitStatus::Exited(_, code) => Err(Error::Exec(ExecError::Code(code))),
            WaitStatus::Signaled(_, signal, _) => Err(Error::Exec(ExecError::Signal(signal))),
            _ => Err(Error::Exec(ExecError::UnknownSignal)),
        };

        clear_sigint_forward();

        result
    }

    /// Write `contents` to a temp executable in the rootfs, run it to
    /// completion, then remove it
    pub fn script(&mut self, contents: &str) -> Result<(), Error> {
        let name = format!(".cv-script-{}", self.script_count);
        self.script_count += 1;

        let host_path = self.root.join(&name);
        write(&host_path, contents)?;
        set_permissions(&host_path, Permissions::from_mode(0o755))?;

        let result = self.spawn(format!("/{name}"), SpawnOptions::default().wait());

        let _ = remove_file(&host_path);

        result.map(|_| ())
    }

    /// Reap anything still running and release the rootfs. Safe to call
    /// on an already torn down container via [`Drop`].
    pub fn destroy(mut self) -> Result<(), Error> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), Error> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        for pid in std::mem::take(&mut self.children) {
            let _ = kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
        }

        Ok(())
    }

    fn enter(&self, path: PathBuf, options: SpawnOptions) -> Result<Pid, Error> {
        let mut stack = vec![0u8; 4 * 1024 * 1024];

        let rootless = !Uid::effective().is_root();

        // Pipe to synchronize parent & child
        let (sync_read, sync_write) = {
            let (r, w) = pipe()?;
            (r.into_raw_fd(), w.into_raw_fd())
        };

        let mut flags =
            CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWIPC | CloneFlags::CLONE_NEWUTS;

        if rootless {
            flags |= CloneFlags::CLONE_NEWUSER;
        }

        let isolate_network =
            !self.options.networking || self.options.profile.as_ref().is_some_and(|p| p.network_isolated);
        if isolate_network {
            flags |= CloneFlags::CLONE_NEWNET;
        }

        let pid = unsafe {
            clone(
                Box::new(|| match run_inside(self, (sync_read, sync_write), &path, &options) {
                    Ok(code) => code as isize,
                    Err(e) => {
                        eprintln!("Error: {e}");
                        1
                    }
                }),
                &mut stack,
                flags,
                Some(SIGCHLD),
            )?
        };

        if rootless {
            // Update uid / gid map to map current user to root in container
            write(format!("/proc/{pid}/setgroups"), "deny")?;
            write(format!("/proc/{pid}/uid_map"), format!("0 {} 1", getuid()))?;
            write(format!("/proc/{pid}/gid_map"), format!("0 {} 1", getgid()))?;
        }

        // Allow child to continue
        close(sync_write)?;

        Ok(pid)
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

/// Child side of the clone: wait for the parent, set the environment
/// up, then exec the requested process and report its exit code
fn run_inside(container: &Container, sync: (i32, i32), path: &Path, options: &SpawnOptions) -> Result<i32, Error> {
    // Close unused write end
    close(sync.1)?;
    // Got EOF, continue
    read(sync.0, &mut [0u8; 1])?;
    close(sync.0)?;

    setup(container)?;

    let work_dir = options
        .working_dir
        .clone()
        .or_else(|| container.options.work_dir.clone())
        .unwrap_or_else(|| "/".into());

    let mut command = Command::new(path);
    command
        .args(&options.arguments)
        .env_clear()
        .envs(options.environment.iter().map(|(k, v)| (k, v)))
        .current_dir(work_dir);

    let status = command.status()?;

    Ok(status.code().unwrap_or(1))
}

fn setup(container: &Container) -> Result<(), Error> {
    let profile = container.options.profile.as_ref();

    if container.options.networking {
        setup_networking(&container.root)?;
    }

    pivot(&container.root, &container.options.mounts)?;

    setup_root_user(profile.and_then(|p| p.run_as.as_ref()))?;

    if let Some(hostname) = &container.options.hostname {
        sethostname(hostname)?;
    }

    if let Some(profile) = profile {
        mask_paths(&profile.masked_paths)?;

        if profile.read_only_root {
            // Self-bind keeps writable paths out of the / remount
            for path in &profile.writable_paths {
                add_mount(Some(path), path, None, MsFlags::MS_BIND)?;
            }
            mount(
                None::<&str>,
                "/",
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )?;
        }
    }

    caps::reduce_bounding(container.policy.dropped)?;

    if profile.is_some_and(|p| p.no_new_privileges || p.no_suid) {
        no_new_privileges()?;
    }

    if let Some(run_as) = profile.and_then(|p| p.run_as.as_ref()) {
        switch_user_with_capabilities(run_as.uid, run_as.gid, container.policy.primary)?;
    }

    Ok(())
}

fn pivot(root: &Path, mounts: &[Mount]) -> Result<(), Error> {
    const OLD_PATH: &str = "old_root";

    let old_root = root.join(OLD_PATH);

    add_mount(None, "/", None, MsFlags::MS_REC | MsFlags::MS_PRIVATE)?;
    add_mount(Some(root), root, None, MsFlags::MS_BIND)?;

    for entry in mounts {
        let source = entry.host.canonicalize()?;
        let target = root.join(entry.container.strip_prefix("/").unwrap_or(&entry.container));

        let mut flags = MsFlags::MS_BIND;
        if entry.flags.contains(MountFlags::RECURSIVE) {
            flags |= MsFlags::MS_REC;
        }

        add_mount(Some(&source), &target, None, flags)?;

        if entry.flags.contains(MountFlags::READONLY) {
            mount(
                None::<&Path>,
                &target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )?;
        }
    }

    ensure_directory(&old_root)?;
    pivot_root(root, &old_root)?;

    set_current_dir("/")?;

    add_mount(Some("proc"), "proc", Some("proc"), MsFlags::empty())?;
    add_mount(Some("tmpfs"), "tmp", Some("tmpfs"), MsFlags::empty())?;
    add_mount(
        Some(format!("/{OLD_PATH}/sys").as_str()),
        "sys",
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_SLAVE,
    )?;
    add_mount(
        Some(format!("/{OLD_PATH}/dev").as_str()),
        "dev",
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_SLAVE,
    )?;

    umount2(OLD_PATH, MntFlags::MNT_DETACH)?;
    remove_dir(OLD_PATH)?;

    Ok(())
}

fn setup_root_user(run_as: Option<&RunAs>) -> Result<(), Error> {
    ensure_directory("/etc")?;

    let mut passwd = "root:x:0:0:root::/bin/bash\n".to_owned();
    let mut group = "root:x:0:\n".to_owned();

    if let Some(RunAs {
        uid,
        gid,
        user: Some(user),
    }) = run_as
    {
        passwd.push_str(&format!("{user}:x:{uid}:{gid}:{user}::/bin/sh\n"));
        group.push_str(&format!("{user}:x:{gid}:\n"));
    }

    write("/etc/passwd", passwd)?;
    write("/etc/group", group)?;

    Ok(())
}

fn setup_networking(root: &Path) -> Result<(), Error> {
    ensure_directory(root.join("etc"))?;
    copy("/etc/resolv.conf", root.join("etc/resolv.conf"))?;
    copy("/etc/protocols", root.join("etc/protocols"))?;
    Ok(())
}

/// Hide each masked path: directories get an empty tmpfs, files get
/// /dev/null bound over them. Missing paths are skipped.
fn mask_paths(paths: &[PathBuf]) -> Result<(), Error> {
    for path in paths {
        let Ok(metadata) = std::fs::metadata(path) else {
            continue;
        };

        if metadata.is_dir() {
            mount(
                Some("tmpfs"),
                path,
                Some("tmpfs"),
                MsFlags::MS_RDONLY,
                None::<&str>,
            )?;
        } else {
            mount(
                Some(Path::new("/dev/null")),
                path,
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )?;
        }
    }
    Ok(())
}

fn no_new_privileges() -> Result<(), Error> {
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(())
}

/// Drop to an unprivileged identity, keeping only `primary`
/// capabilities. Fails unless both the real and effective uid and gid
/// end up non-zero.
pub fn switch_user_with_capabilities(uid: u32, gid: u32, primary: CapabilitySet) -> Result<(), Error> {
    if uid == 0 || gid == 0 {
        return Err(Error::PrivilegedSwitchTarget);
    }

    // Permitted set must survive the identity change for the worker to
    // re-raise its primary capabilities
    let rc = unsafe { libc::prctl(libc::PR_SET_KEEPCAPS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    setgid(Gid::from_raw(gid))?;
    setuid(Uid::from_raw(uid))?;

    let (real_uid, effective_uid) = (getuid().as_raw(), geteuid().as_raw());
    let (real_gid, effective_gid) = (getgid().as_raw(), getegid().as_raw());

    if real_uid == 0 || effective_uid == 0 || real_gid == 0 || effective_gid == 0 {
        return Err(Error::SwitchVerify {
            uid: real_uid,
            gid: real_gid,
        });
    }

    caps::set_ambient(primary)?;

    let rc = unsafe { libc::prctl(libc::PR_SET_KEEPCAPS, 0, 0, 0, 0) };
    if rc != 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(())
}

/// Relay SIGINT from this process to `pid` so an interactive interrupt
/// reaches the in-container process first
pub fn forward_sigint(pid: Pid) -> Result<(), nix::Error> {
    FORWARD_PID.store(pid.as_raw(), Ordering::SeqCst);

    unsafe {
        sigaction(
            Signal::SIGINT,
            &SigAction::new(SigHandler::Handler(handle_sigint), SaFlags::empty(), SigSet::empty()),
        )?;
    }

    Ok(())
}

fn clear_sigint_forward() {
    FORWARD_PID.store(0, Ordering::SeqCst);
}

static FORWARD_PID: AtomicI32 = AtomicI32::new(0);

extern "C" fn handle_sigint(_: libc::c_int) {
    let pid = FORWARD_PID.load(Ordering::SeqCst);
    if pid != 0 {
        let _ = kill(Pid::from_raw(pid), Signal::SIGINT);
    }
}

fn ensure_directory(path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    if !path.exists() {
        create_dir_all(path)?;
    }
    Ok(())
}

fn add_mount<T: AsRef<Path>>(source: Option<T>, target: T, fs_type: Option<&str>, flags: MsFlags) -> Result<(), Error> {
    ensure_directory(&target)?;
    mount(
        source.as_ref().map(AsRef::as_ref),
        target.as_ref(),
        fs_type,
        flags,
        Option::<&str>::None,
    )?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed with status code {0}")]
    Code(i32),
    #[error("stopped by signal {}", .0.as_str())]
    Signal(Signal),
    #[error("stopped by unknown signal")]
    UnknownSignal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("container already destroyed")]
    Destroyed,
    #[error("refusing to switch to a privileged identity")]
    PrivilegedSwitchTarget,
    #[error("identity switch left uid {uid} gid {gid} privileged")]
    SwitchVerify { uid: u32, gid: u32 },
    #[error("profile")]
    Profile(#[from] profile::Error),
    #[error("capabilities")]
    Caps(#[from] caps::Error),
    #[error("exec")]
    Exec(#[from] ExecError),
    #[error("nix")]
    Nix(#[from] nix::Error),
    #[error("io")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mount_flags_compose() {
        let mount = Mount::bind("/host", "/guest").read_only().recursive();

        assert!(mount.flags.contains(MountFlags::BIND));
        assert!(mount.flags.contains(MountFlags::READONLY));
        assert!(mount.flags.contains(MountFlags::RECURSIVE));
        assert!(!MountFlags::BIND.contains(MountFlags::READONLY));
    }

    #[test]
    fn create_rejects_contradictory_profile() {
        let root = tempfile::tempdir().unwrap();

        let profile = Profile {
            name: "broken".into(),
            allowed: CapabilitySet::with(&[Capability::NetAdmin]),
            dropped: CapabilitySet::with(&[Capability::NetAdmin]),
            ..Default::default()
        };

        let result = Container::create(root.path(), Options::new().profile(profile));
        assert!(matches!(result, Err(Error::Profile(_))));
    }

    #[test]
    fn create_composes_effective_policy() {
        let root = tempfile::tempdir().unwrap();

        let profile = Profile {
            name: "quiet".into(),
            dropped: CapabilitySet::with(&[Capability::Setuid]),
            ..Default::default()
        };

        let container = Container::create(root.path(), Options::new().profile(profile)).unwrap();

        assert!(!container.policy.primary.contains(Capability::Setuid));
        assert!(container.policy.dropped.contains(Capability::Setuid));
        assert!(container.policy.primary.is_disjoint(container.policy.dropped));
    }

    #[test]
    fn spawn_options_accumulate() {
        let options = SpawnOptions::default()
            .args(["-c", "exit 0"])
            .env("PATH", "/usr/bin:/bin")
            .working_dir("/chef/project")
            .wait();

        assert_eq!(options.arguments, vec!["-c".to_owned(), "exit 0".to_owned()]);
        assert_eq!(options.environment.len(), 1);
        assert!(options.flags.contains(SpawnFlags::WAIT));
    }
}
