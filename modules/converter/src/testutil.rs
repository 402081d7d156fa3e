//! Test fixtures shared across this crate's test modules.

use std::io::Cursor;
use tiff::encoder::{colortype, TiffEncoder};

/// Build an in-memory grayscale TIFF; one image per page, each page
/// filled with its own constant shade so order is observable.
pub(crate) fn synth_tiff(pages: &[(u32, u32, u8)]) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut out).unwrap();
        for &(width, height, shade) in pages {
            let data = vec![shade; (width * height) as usize];
            encoder
                .write_image::<colortype::Gray8>(width, height, &data)
                .unwrap();
        }
    }
    out.into_inner()
}
