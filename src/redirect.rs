use std::os::fd::RawFd;
use std::path::Path;

use aya::maps::XskMap;
use aya::programs::{Xdp, XdpFlags};
use aya::Ebpf;
use log::{debug, info};

use crate::error::SetupError;

/// Name of the XSKMAP destination map every classifier variant exposes. The
/// classifier steers frames to map slots; each reactor publishes its socket
/// fd into the slot it serves.
pub const SOCKET_MAP_NAME: &str = "xsks_map";

/// A classifier object loaded into the kernel and attached to one
/// interface's receive hook. Dropping this detaches the program and clears
/// the hook.
#[derive(Debug)]
pub struct RedirectProgram {
    ebpf: Ebpf,
    interface: String,
}

impl RedirectProgram {
    /// Load the pre-compiled classifier object at `path`, pick the program
    /// named `program` out of it, and attach it to `interface`.
    pub fn load_and_attach(
        path: &Path,
        program: &str,
        interface: &str,
    ) -> Result<Self, SetupError> {
        let mut ebpf = Ebpf::load_file(path).map_err(|source| SetupError::ProgramLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let xdp: &mut Xdp = ebpf
            .program_mut(program)
            .ok_or_else(|| SetupError::ProgramNotFound(program.to_string()))?
            .try_into()?;
        xdp.load()?;
        xdp.attach(interface, XdpFlags::default())?;

        info!("classifier {program} attached to {interface} ({})", path.display());
        Ok(Self {
            ebpf,
            interface: interface.to_string(),
        })
    }

    /// Publish an AF_XDP socket fd at `index` in the destination map. Frames
    /// the classifier redirects to that index land on the socket.
    pub fn register_socket(&mut self, index: u32, fd: RawFd) -> Result<(), SetupError> {
        let map = self
            .ebpf
            .map_mut(SOCKET_MAP_NAME)
            .ok_or_else(|| SetupError::MapNotFound(SOCKET_MAP_NAME.to_string()))?;
        let mut sockets: XskMap<_> = XskMap::try_from(map)?;
        sockets.set(index, fd, 0)?;
        debug!("socket fd {fd} registered at destination index {index}");
        Ok(())
    }
}

impl Drop for RedirectProgram {
    fn drop(&mut self) {
        // aya detaches the XDP link when the loaded object drops.
        debug!("detaching classifier from {}", self.interface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_object_file_is_a_load_error() {
        let err = RedirectProgram::load_and_attach(
            Path::new("/nonexistent/classifier.o"),
            "xsk_pass",
            "lo",
        )
        .unwrap_err();
        assert!(matches!(err, SetupError::ProgramLoad { .. }));
    }
}
