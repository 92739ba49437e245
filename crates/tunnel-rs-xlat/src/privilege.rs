//! Chroot and privilege drop, applied after the I/O handles are open.

use anyhow::{Context, Result};
use nix::unistd::{chdir, chroot, setgid, setgroups, setuid, Gid, Uid};
use tunnel_common::config::ProgramSettings;

/// Apply the `[program]` chroot and user/group settings.
///
/// The group is changed before the user, since dropping the user first
/// would remove the permission to change the group. A user without a group
/// is refused, as it would keep root's group and supplementary groups.
pub fn drop_privileges(program: &ProgramSettings) -> Result<()> {
    if let (Some(user), None) = (&program.privilege_drop_user, &program.privilege_drop_group) {
        anyhow::bail!(
            "Refusing to switch to user '{}' without a group to switch to",
            user.name
        );
    }

    if let Some(dir) = &program.chroot_dir {
        chroot(dir.as_path()).with_context(|| format!("Failed to chroot into {}", dir.display()))?;
        chdir("/").context("Failed to change directory after chroot")?;
        log::info!("Changed root directory to {}", dir.display());
    }

    if let Some(group) = &program.privilege_drop_group {
        let gid = Gid::from_raw(group.id);
        setgroups(&[gid]).context("Failed to set supplementary groups")?;
        setgid(gid).with_context(|| format!("Failed to switch to group '{}'", group.name))?;
        log::info!("Switched to group {} ({})", group.name, group.id);
    }

    if let Some(user) = &program.privilege_drop_user {
        setuid(Uid::from_raw(user.id))
            .with_context(|| format!("Failed to switch to user '{}'", user.name))?;
        log::info!("Switched to user {} ({})", user.name, user.id);
    }

    Ok(())
}
