//! Process setup: the inherited socket, the installation root and the pid
//! file.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::PathBuf;

use anyhow::{Context, bail};
use nix::fcntl::{FcntlArg, fcntl};
use tokio::net::UnixStream;

use dscbridge::BridgeConfig;

/// Takes ownership of the socket the host left open at `fd`.
///
/// From here on the descriptor is closed when the returned handle drops, so
/// an early startup failure still releases it.
pub fn adopt_socket(fd: RawFd) -> io::Result<OwnedFd> {
    if fd < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file descriptor {fd}"),
        ));
    }

    // Safety: the borrow only lives for the F_GETFD check, which fails with
    // EBADF instead of touching anything when the descriptor is not open.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    fcntl(borrowed, FcntlArg::F_GETFD).map_err(io::Error::from)?;

    // Safety: the descriptor is open and was handed to this process for its
    // exclusive use; nothing else in the process refers to it.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    tracing::debug!(fd = owned.as_raw_fd(), "Adopted host socket");
    Ok(owned)
}

/// Registers the socket with the running tokio reactor.
pub fn into_async(socket: OwnedFd) -> io::Result<UnixStream> {
    let std_stream = StdUnixStream::from(socket);
    std_stream.set_nonblocking(true)?;
    UnixStream::from_std(std_stream)
}

pub fn ensure_omi_home(config: &BridgeConfig) -> anyhow::Result<()> {
    if !config.omi_home.is_dir() {
        bail!(
            "OMI installation root {} does not exist (set OMI_HOME)",
            config.omi_home.display()
        );
    }
    Ok(())
}

/// Records this process's pid under the installation root.
pub fn write_pid_file(config: &BridgeConfig, uid: u32) -> anyhow::Result<PathBuf> {
    let path = config.pid_file(uid);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(&path, format!("{}\n", std::process::id()))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::fd::IntoRawFd;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn adopts_an_open_socket() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let fd = theirs.into_raw_fd();

        let owned = adopt_socket(fd).unwrap();
        let mut adopted = StdUnixStream::from(owned);
        adopted.write_all(b"ok").unwrap();

        let mut buf = [0u8; 2];
        (&ours).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[test]
    fn rejects_closed_and_negative_descriptors() {
        // Far above any descriptor the test process opens.
        assert_eq!(
            adopt_socket(1_000_000).unwrap_err().raw_os_error(),
            Some(nix::libc::EBADF)
        );
        assert_eq!(
            adopt_socket(-1).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[tokio::test]
    async fn adopted_socket_is_async() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let mut ours = UnixStream::from_std(ours).unwrap();

        let mut stream = into_async(adopt_socket(theirs.into_raw_fd()).unwrap()).unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut received = Vec::new();
        ours.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ping");
    }

    #[test]
    fn missing_omi_home_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::new(dir.path().join("missing"));
        let err = ensure_omi_home(&config).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");

        assert!(ensure_omi_home(&BridgeConfig::new(dir.path())).is_ok());
    }

    #[test]
    fn pid_file_is_written_under_omi_home() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::new(dir.path());

        let path = write_pid_file(&config, 1000).unwrap();
        assert_eq!(
            path,
            dir.path().join("var/run/dscbridge/1000/dsc_bridge.pid")
        );
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
