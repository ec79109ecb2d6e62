//! FOURCC pixel format codes understood by the overlay.

pub const fn make_fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

/// Packed 4:4:4:4 AYUV, 32 bits per pixel.
pub const FOURCC_AYUV: u32 = make_fourcc(b"AYUV");
/// Packed 4:2:2 with the U sample first.
pub const FOURCC_UYVY: u32 = make_fourcc(b"UYVY");
/// Packed 4:2:2 with the Y sample first.
pub const FOURCC_YUY2: u32 = make_fourcc(b"YUY2");
/// Planar 4:2:0: a Y plane followed by quarter-size V and U planes.
pub const FOURCC_YV12: u32 = make_fourcc(b"YV12");

/// Upper bound on the number of FOURCCs the host ever reports.
pub const VHWA_NUMFOURCC: usize = 4;

pub const KNOWN_FOURCCS: [u32; VHWA_NUMFOURCC] =
    [FOURCC_AYUV, FOURCC_UYVY, FOURCC_YUY2, FOURCC_YV12];

/// Printable form for logs; non-ASCII bytes come out as `?`.
pub fn fourcc_name(fourcc: u32) -> String {
    fourcc
        .to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}
