//! Packet I/O handles.
//!
//! Packets come from a TUN interface opened through the clone device, or from
//! a pair of file descriptors inherited from the parent process.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use tunnel_common::config::{IoMode, TunSettings};

// ioctl constants
const TUNSETIFF: libc::c_ulong = 0x400454ca;
const TUNSETPERSIST: libc::c_ulong = 0x400454cb;
const TUNSETOWNER: libc::c_ulong = 0x400454cc;
const TUNSETGROUP: libc::c_ulong = 0x400454ce;

// TUN flags
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;

/// ifreq structure for ioctl calls.
#[repr(C)]
struct Ifreq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _padding: [u8; 22],
}

/// An attached TUN interface.
pub struct TunDevice {
    file: File,
    name: String,
}

impl TunDevice {
    /// Attach to (or create) the interface named in `settings`.
    ///
    /// Owner and group are applied when configured.
    pub fn open(settings: &TunSettings) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&settings.device_path)
            .with_context(|| format!("Failed to open {}", settings.device_path.display()))?;

        let mut ifr = Ifreq {
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_flags: IFF_TUN | IFF_NO_PI,
            _padding: [0; 22],
        };
        let name_bytes = settings.interface_name.as_bytes();
        let len = name_bytes.len().min(libc::IFNAMSIZ - 1);
        for (i, &b) in name_bytes[..len].iter().enumerate() {
            ifr.ifr_name[i] = b as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &ifr) };
        if ret < 0 {
            return Err(io::Error::last_os_error()).with_context(|| {
                format!("TUNSETIFF failed for interface '{}'", settings.interface_name)
            });
        }

        let device = Self {
            file,
            name: settings.interface_name.clone(),
        };
        if let Some(owner) = &settings.owner_user {
            device
                .ioctl_value(TUNSETOWNER, owner.id as libc::c_ulong)
                .with_context(|| format!("TUNSETOWNER to '{}' failed", owner.name))?;
        }
        if let Some(group) = &settings.owner_group {
            device
                .ioctl_value(TUNSETGROUP, group.id as libc::c_ulong)
                .with_context(|| format!("TUNSETGROUP to '{}' failed", group.name))?;
        }

        log::info!("Attached to TUN interface {}", device.name);
        Ok(device)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keep the interface after the last descriptor is closed (`mktun`), or
    /// let it disappear (`rmtun`).
    pub fn set_persist(&self, persist: bool) -> Result<()> {
        self.ioctl_value(TUNSETPERSIST, persist as libc::c_ulong)
            .with_context(|| format!("TUNSETPERSIST({}) failed for '{}'", persist, self.name))
    }

    fn ioctl_value(&self, request: libc::c_ulong, value: libc::c_ulong) -> io::Result<()> {
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request, value) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Read and write handles for one worker.
pub struct PacketChannel {
    pub reader: File,
    pub writer: File,
}

impl PacketChannel {
    /// Open the channel described by the configured I/O mode.
    pub fn open(io_mode: &IoMode) -> Result<Self> {
        match io_mode {
            IoMode::Tun(settings) => {
                let device = TunDevice::open(settings)?;
                let writer = device
                    .file
                    .try_clone()
                    .context("Failed to duplicate TUN descriptor")?;
                Ok(Self {
                    reader: device.file,
                    writer,
                })
            }
            IoMode::InheritedFds { read_fd, write_fd } => {
                let reader = take_inherited_fd(*read_fd).context("Invalid read_fd")?;
                let writer = if read_fd == write_fd {
                    reader.try_clone().context("Failed to duplicate inherited descriptor")?
                } else {
                    take_inherited_fd(*write_fd).context("Invalid write_fd")?
                };
                log::info!("Using inherited descriptors {} (read) and {} (write)", read_fd, write_fd);
                Ok(Self { reader, writer })
            }
        }
    }

    /// Duplicate both handles for another worker thread.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            reader: self.reader.try_clone()?,
            writer: self.writer.try_clone()?,
        })
    }
}

/// Take ownership of a descriptor inherited from the parent process.
fn take_inherited_fd(fd: RawFd) -> Result<File> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("File descriptor {} is not open", fd));
    }
    // The descriptor is open and nothing else in this process owns it
    Ok(unsafe { File::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_ifreq_layout() {
        assert_eq!(std::mem::size_of::<Ifreq>(), 40);
    }

    #[test]
    fn test_closed_fd_rejected() {
        assert!(take_inherited_fd(987_654).is_err());
    }

    #[test]
    fn test_inherited_fds_channel() {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let channel = PacketChannel::open(&IoMode::InheritedFds {
            read_fd: fds[0],
            write_fd: fds[1],
        })
        .unwrap();
        let mut clone = channel.try_clone().unwrap();

        clone.writer.write_all(b"packet").unwrap();
        let mut buf = [0u8; 16];
        let n = clone.reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"packet");
    }
}
