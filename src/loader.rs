//! Image loader: parses the on-disk VM image format and constructs a
//! ready-to-run [`Machine`].
//!
//! Layout (all multi-byte fields little-endian, see SPEC_FULL.md §6):
//! `magic[4] mem_size_kib[8] ker_addr[8] ker_size[8] ker_jump[8] payload[..]`

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::LoadError;
use crate::machine::Machine;

const MAGIC: [u8; 4] = [0x45, 0x45, 0xFA, 0xDE];
const HEADER_LEN: usize = 36;

/// A validated, not-yet-materialised image header plus its payload slice.
struct Header {
    mem_size: u64,
    ker_addr: u64,
    ker_size: u64,
    ker_jump: u64,
}

fn parse_header(data: &[u8]) -> Result<Header, LoadError> {
    if data.len() < HEADER_LEN {
        return Err(LoadError::Truncated { need: HEADER_LEN, got: data.len() });
    }

    let magic = [data[0], data[1], data[2], data[3]];
    if magic != MAGIC {
        return Err(LoadError::BadMagic(magic));
    }

    let mem_size_kib = u64::from_le_bytes(data[4..12].try_into().unwrap());
    let ker_addr = u64::from_le_bytes(data[12..20].try_into().unwrap());
    let ker_size = u64::from_le_bytes(data[20..28].try_into().unwrap());
    let ker_jump = u64::from_le_bytes(data[28..36].try_into().unwrap());
    let mem_size = mem_size_kib.saturating_mul(1024);

    if ker_addr.checked_add(ker_size).map_or(true, |end| end > mem_size) {
        return Err(LoadError::KernelOutOfBounds { ker_addr, ker_size, mem_size });
    }
    if ker_jump >= ker_size {
        return Err(LoadError::JumpOutOfRange { ker_jump, ker_size });
    }

    Ok(Header { mem_size, ker_addr, ker_size, ker_jump })
}

/// Build a machine from an already-loaded image buffer (used by the CLI
/// after `std::fs::read`, and directly by tests that build an image
/// in-memory rather than round-tripping through the filesystem).
pub fn load_from_bytes(data: &[u8]) -> Result<Machine, LoadError> {
    let header = parse_header(data)?;
    let payload_end = HEADER_LEN + header.ker_size as usize;
    if data.len() < payload_end {
        return Err(LoadError::Truncated { need: payload_end, got: data.len() });
    }
    let payload = &data[HEADER_LEN..payload_end];

    debug!(
        target: "corevm::loader",
        "loaded image: mem_size=0x{:x} ker_addr=0x{:x} ker_size=0x{:x} ker_jump=0x{:x}",
        header.mem_size, header.ker_addr, header.ker_size, header.ker_jump
    );

    Ok(Machine::new(header.mem_size as usize, header.ker_addr, payload, header.ker_jump))
}

/// Build a machine by reading `path` from disk.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Machine, LoadError> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let data = std::fs::read(&path).map_err(|source| LoadError::Io { path: path.clone(), source })?;
    load_from_bytes(&data)
}

/// Build an in-memory image buffer from its constituent parts, for tests
/// and for anything else that wants to construct an image without a file
/// on disk (the image-load round-trip law in SPEC_FULL.md §8).
pub fn build_image(mem_size_kib: u64, ker_addr: u64, ker_jump: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&mem_size_kib.to_le_bytes());
    buf.extend_from_slice(&ker_addr.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(&ker_jump.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_image_sets_ip_to_addr_plus_jump() {
        let image = build_image(1, 0, 0, &[0x0E]);
        let machine = load_from_bytes(&image).unwrap();
        assert_eq!(machine.regs.ip(), 0);
    }

    #[test]
    fn payload_is_placed_exactly_at_ker_addr() {
        let image = build_image(4, 0x100, 0, &[1, 2, 3, 4]);
        let machine = load_from_bytes(&image).unwrap();
        let mut buf = [0u8; 4];
        machine.mem.read_bytes(0x100, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = load_from_bytes(&[0x45, 0x45]).unwrap_err();
        assert!(matches!(err, LoadError::Truncated { .. }));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut image = build_image(1, 0, 0, &[]);
        image[0] = 0xFF;
        let err = load_from_bytes(&image).unwrap_err();
        assert!(matches!(err, LoadError::BadMagic(_)));
    }

    #[test]
    fn kernel_out_of_bounds_is_rejected() {
        let image = build_image(1, 1000, 0, &[1, 2, 3]);
        let err = load_from_bytes(&image).unwrap_err();
        assert!(matches!(err, LoadError::KernelOutOfBounds { .. }));
    }

    #[test]
    fn jump_past_kernel_end_is_rejected() {
        let image = build_image(1, 0, 10, &[1, 2, 3]);
        let err = load_from_bytes(&image).unwrap_err();
        assert!(matches!(err, LoadError::JumpOutOfRange { .. }));
    }
}
