use crate::CoreError;
use director_runtime::MountDescriptor;
use director_schema::{IdOrName, VolumeSpec};
use std::ffi::CString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const PASSWD_BUF_START: usize = 1024;
const PASSWD_BUF_MAX: usize = 1 << 20;

/// Sets the process umask and restores the previous one on drop.
pub struct UmaskGuard {
    previous: libc::mode_t,
}

impl UmaskGuard {
    #[allow(unsafe_code)]
    pub fn set(mask: u32) -> Self {
        // SAFETY: umask(2) cannot fail and only swaps the process file mode mask.
        let previous = unsafe { libc::umask(mask as libc::mode_t) };
        Self { previous }
    }
}

impl Drop for UmaskGuard {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: see `UmaskGuard::set`.
        unsafe {
            libc::umask(self.previous);
        }
    }
}

/// Prepare `volume` for mounting at `mountpoint` inside a jail.
///
/// Directory-backed devices are resolved against `base_dir`, created when
/// absent (under the volume's umask), canonicalized, then given the
/// requested mode and ownership. Other devices pass through untouched.
pub fn resolve_volume(
    volume: &VolumeSpec,
    mountpoint: &str,
    base_dir: &Path,
) -> Result<MountDescriptor, CoreError> {
    let device = if volume.is_directory_backed() {
        prepare_directory(volume, base_dir)?
            .to_string_lossy()
            .into_owned()
    } else {
        volume.device.clone()
    };

    Ok(MountDescriptor {
        device,
        mountpoint: mountpoint.to_owned(),
        fs_type: volume.fs_type.clone(),
        options: volume.options.clone(),
        dump: volume.dump,
        pass: volume.pass,
    })
}

fn prepare_directory(volume: &VolumeSpec, base_dir: &Path) -> Result<PathBuf, CoreError> {
    let fail = |message: String| CoreError::VolumeResolution {
        volume: volume.name.clone(),
        message,
    };

    let path = base_dir.join(&volume.device);
    if !path.exists() {
        let _umask = volume.umask.map(UmaskGuard::set);
        std::fs::create_dir_all(&path)
            .map_err(|e| fail(format!("cannot create {}: {e}", path.display())))?;
        tracing::debug!("created volume directory {}", path.display());
    }

    let path = path
        .canonicalize()
        .map_err(|e| fail(format!("cannot resolve {}: {e}", path.display())))?;

    if let Some(mode) = volume.mode {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| fail(format!("chmod {mode:o}: {e}")))?;
    }

    if volume.owner.is_some() || volume.group.is_some() {
        let uid = volume.owner.as_ref().map(resolve_owner).transpose()?;
        let gid = volume.group.as_ref().map(resolve_group).transpose()?;
        std::os::unix::fs::chown(&path, uid, gid)
            .map_err(|e| fail(format!("chown: {e}")))?;
    }

    Ok(path)
}

fn resolve_owner(owner: &IdOrName) -> Result<u32, CoreError> {
    match owner {
        IdOrName::Id(uid) => Ok(*uid),
        IdOrName::Name(name) => {
            lookup_uid(name)?.ok_or_else(|| CoreError::UnknownOwner(name.clone()))
        }
    }
}

fn resolve_group(group: &IdOrName) -> Result<u32, CoreError> {
    match group {
        IdOrName::Id(gid) => Ok(*gid),
        IdOrName::Name(name) => {
            lookup_gid(name)?.ok_or_else(|| CoreError::UnknownGroup(name.clone()))
        }
    }
}

/// Look a user up in the password database.
#[allow(unsafe_code)]
pub fn lookup_uid(name: &str) -> Result<Option<u32>, CoreError> {
    let Ok(cname) = CString::new(name) else {
        return Ok(None);
    };
    let mut buf: Vec<libc::c_char> = vec![0; PASSWD_BUF_START];
    loop {
        // SAFETY: an all-zero passwd is a valid value for getpwnam_r to overwrite.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        // SAFETY: every pointer refers to a live local and `buf.len()` bounds the buffer.
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < PASSWD_BUF_MAX {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(CoreError::Io(std::io::Error::from_raw_os_error(rc)));
        }
        return Ok((!result.is_null()).then_some(pwd.pw_uid));
    }
}

/// Look a group up in the group database.
#[allow(unsafe_code)]
pub fn lookup_gid(name: &str) -> Result<Option<u32>, CoreError> {
    let Ok(cname) = CString::new(name) else {
        return Ok(None);
    };
    let mut buf: Vec<libc::c_char> = vec![0; PASSWD_BUF_START];
    loop {
        // SAFETY: an all-zero group is a valid value for getgrnam_r to overwrite.
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        // SAFETY: every pointer refers to a live local and `buf.len()` bounds the buffer.
        let rc = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                &mut grp,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < PASSWD_BUF_MAX {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(CoreError::Io(std::io::Error::from_raw_os_error(rc)));
        }
        return Ok((!result.is_null()).then_some(grp.gr_gid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// The umask is process-wide; tests that observe it run one at a time.
    static UMASK_TESTS: Mutex<()> = Mutex::new(());

    fn volume(device: &str, fs_type: &str) -> VolumeSpec {
        VolumeSpec {
            name: "data".to_owned(),
            device: device.to_owned(),
            fs_type: fs_type.to_owned(),
            options: "rw".to_owned(),
            dump: 0,
            pass: 0,
            umask: None,
            mode: None,
            owner: None,
            group: None,
        }
    }

    #[test]
    fn relative_directory_is_created_and_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let spec = volume("./data/www", "nullfs");
        let mount = resolve_volume(&spec, "/usr/local/www", dir.path()).unwrap();
        let expected = dir.path().canonicalize().unwrap().join("data/www");
        assert_eq!(mount.device, expected.to_string_lossy());
        assert!(expected.is_dir());
        assert_eq!(mount.mountpoint, "/usr/local/www");
        assert_eq!(mount.fs_type, "nullfs");
    }

    #[test]
    fn absolute_device_ignores_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("abs");
        let mount = resolve_volume(
            &volume(&target.to_string_lossy(), "<pseudofs>"),
            "/mnt",
            Path::new("/nonexistent-base"),
        )
        .unwrap();
        assert!(target.is_dir());
        assert_eq!(mount.device, target.canonicalize().unwrap().to_string_lossy());
    }

    #[test]
    fn mode_applied_after_umask_and_umask_restored() {
        let _serial = UMASK_TESTS.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut spec = volume("restricted", "nullfs");
        spec.umask = Some(0o077);
        spec.mode = Some(0o755);

        let before = {
            let current = UmaskGuard::set(0o022);
            let previous = current.previous;
            drop(current);
            previous
        };

        resolve_volume(&spec, "/data", dir.path()).unwrap();
        let mode = std::fs::metadata(dir.path().join("restricted"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o755);

        let after = {
            let current = UmaskGuard::set(0o022);
            let previous = current.previous;
            drop(current);
            previous
        };
        assert_eq!(before, after);
    }

    #[test]
    fn umask_guard_restores_on_drop() {
        let _serial = UMASK_TESTS.lock().unwrap();
        let original = UmaskGuard::set(0o022);
        {
            let _inner = UmaskGuard::set(0o077);
        }
        let current = UmaskGuard::set(0o022);
        assert_eq!(current.previous, 0o022);
        drop(current);
        drop(original);
    }

    #[test]
    fn non_directory_device_passes_through() {
        let mount = resolve_volume(&volume("tmpfs", "tmpfs"), "/tmp", Path::new("/base")).unwrap();
        assert_eq!(mount.device, "tmpfs");
        assert_eq!(mount.fs_type, "tmpfs");
    }

    #[test]
    fn unknown_owner_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = volume("owned", "nullfs");
        spec.owner = Some(IdOrName::Name("director-no-such-user".to_owned()));
        assert!(matches!(
            resolve_volume(&spec, "/data", dir.path()),
            Err(CoreError::UnknownOwner(name)) if name == "director-no-such-user"
        ));
    }

    #[test]
    fn unknown_group_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = volume("grouped", "nullfs");
        spec.group = Some(IdOrName::Name("director-no-such-group".to_owned()));
        assert!(matches!(
            resolve_volume(&spec, "/data", dir.path()),
            Err(CoreError::UnknownGroup(_))
        ));
    }

    #[test]
    fn root_user_resolves() {
        assert_eq!(lookup_uid("root").unwrap(), Some(0));
    }
}
