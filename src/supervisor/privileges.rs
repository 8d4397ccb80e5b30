//! Privilege transition after the listeners are bound.
//!
//! Group is dropped before user: once setuid succeeds there is no
//! privilege left to change the group with.

use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, getegid, geteuid, setgid, setgroups, setsid, setuid, Gid, Group, Uid, User};

use crate::error::{BrimError, Result};

/// Switch to the configured identity, apply the umask, become a session
/// leader, and move to the filesystem root.
pub fn drop_privileges(user: Option<&str>, group: Option<&str>, umask_bits: u32) -> Result<()> {
    if user.is_some() || group.is_some() {
        // Shedding supplementary groups needs root; without it the main
        // gid/uid switch below still decides success.
        let _ = setgroups(&[]);

        let mut uid = geteuid();
        let mut gid = getegid();
        if let Some(name) = user {
            let record = User::from_name(name)
                .ok()
                .flatten()
                .ok_or_else(|| BrimError::Privilege(format!("cannot switch to unknown user {name:?}")))?;
            uid = record.uid;
            gid = record.gid;
        }
        if let Some(name) = group {
            let record = Group::from_name(name)
                .ok()
                .flatten()
                .ok_or_else(|| {
                    BrimError::Privilege(format!("cannot switch to unknown group {name:?}"))
                })?;
            gid = record.gid;
        }
        switch_identity(uid, gid, user, group)?;
        tracing::info!(user = user.unwrap_or("-"), group = group.unwrap_or("-"), "privileges dropped");
    }

    umask(Mode::from_bits_truncate(umask_bits));
    // Already being a session leader is fine.
    let _ = setsid();
    let _ = chdir("/");
    Ok(())
}

fn switch_identity(
    uid: Uid,
    gid: Gid,
    user: Option<&str>,
    group: Option<&str>,
) -> Result<()> {
    setgid(gid).map_err(|_| {
        BrimError::Privilege(format!(
            "permission denied when switching to group {:?}",
            group.unwrap_or("-")
        ))
    })?;
    setuid(uid).map_err(|_| {
        BrimError::Privilege(format!(
            "permission denied when switching to user {:?}",
            user.unwrap_or("-")
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_is_rejected() {
        let err = drop_privileges(Some("no-such-user-zz"), None, 0o022).unwrap_err();
        assert!(err.to_string().contains("unknown user"));
    }

    #[test]
    fn test_unknown_group_is_rejected() {
        let err = drop_privileges(None, Some("no-such-group-zz"), 0o022).unwrap_err();
        assert!(err.to_string().contains("unknown group"));
    }

    #[test]
    fn test_no_identity_just_applies_umask() {
        // No user/group configured: only umask/session/chdir side effects.
        assert!(drop_privileges(None, None, 0o022).is_ok());
    }
}
