//! Compositing of ordered snapshots into one full-page image.

use crate::analysis::{PageAnalysis, Rect, Size};
use crate::capture::Capture;
use crate::raster::Raster;
use crate::{CaptureOptions, Result};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Background of every composite. Transparent page areas must not turn into
/// transparency in formats without alpha.
pub const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureType {
    Single,
    Stitched,
}

/// The composite image and how it was produced.
#[derive(Debug, Clone)]
pub struct Stitched {
    pub raster: Raster,
    pub capture_type: CaptureType,
    pub section_count: usize,
}

/// Paint `pieces` onto a white canvas of `canvas` CSS pixels, in iteration
/// order, later pieces overwriting earlier ones. Each piece is resampled to
/// its target rect when the raster was taken at a different pixel density.
pub(crate) fn compose<'a, I>(canvas: Size, pieces: I) -> Result<RgbaImage>
where
    I: IntoIterator<Item = (Rect, &'a Raster)>,
{
    let mut out = RgbaImage::from_pixel(canvas.width, canvas.height, BACKGROUND);
    for (target, raster) in pieces {
        let mut pixels = raster.decode()?;
        if pixels.dimensions() != (target.width, target.height) {
            pixels = imageops::resize(&pixels, target.width, target.height, FilterType::Triangle);
        }
        imageops::replace(&mut out, &pixels, target.x, target.y);
    }
    Ok(out)
}

/// Stitch the captures of one session.
///
/// A single capture whose section already covers the page is passed through
/// untouched (re-encoded only when the requested format differs). Anything
/// else is drawn onto a `page.width x page.height` canvas at the sections'
/// page coordinates in ascending index order.
pub fn stitch(captures: &[Capture], analysis: &PageAnalysis, options: &CaptureOptions) -> Result<Stitched> {
    let capture_type = if captures.len() == 1 {
        CaptureType::Single
    } else {
        CaptureType::Stitched
    };

    if let [only] = captures {
        let section = &only.section;
        if analysis.page.width <= section.width && analysis.page.height <= section.height {
            let raster = if only.raster.format == options.format {
                only.raster.clone()
            } else {
                Raster::encode(&only.raster.decode()?, options.format, options.quality)?
            };
            return Ok(Stitched {
                raster,
                capture_type,
                section_count: 1,
            });
        }
    }

    let mut ordered: Vec<&Capture> = captures.iter().collect();
    ordered.sort_by_key(|c| c.section.index);

    let pixels = compose(
        analysis.page,
        ordered.iter().map(|c| {
            let s = &c.section;
            (Rect::new(s.x as i64, s.y as i64, s.width, s.height), &c.raster)
        }),
    )?;
    let raster = Raster::encode(&pixels, options.format, options.quality)?;

    Ok(Stitched {
        raster,
        capture_type,
        section_count: captures.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ScrollOffset;
    use crate::raster::OutputFormat;
    use crate::sections::{plan_sections, CaptureSection};

    fn analysis(viewport: Size, page: Size) -> PageAnalysis {
        PageAnalysis {
            viewport,
            page,
            scroll_offset: ScrollOffset::default(),
            scrollable_regions: Vec::new(),
            frames: Vec::new(),
            fixed_elements: Vec::new(),
            has_lazy_content: false,
            pixel_ratio: 1.0,
            url: String::new(),
            title: String::new(),
        }
    }

    fn solid(size: Size, color: [u8; 4]) -> Raster {
        let pixels = RgbaImage::from_pixel(size.width, size.height, Rgba(color));
        Raster::encode(&pixels, OutputFormat::Png, 1.0).unwrap()
    }

    fn capture(section: CaptureSection, color: [u8; 4]) -> Capture {
        Capture {
            raster: solid(Size::new(section.width, section.height), color),
            section,
            captured_at_millis: 0,
        }
    }

    #[test]
    fn composite_matches_page_size_and_later_sections_win() {
        let a = analysis(Size::new(800, 600), Size::new(800, 1800));
        let colors = [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255], [0, 0, 0, 255]];
        // Hand them over out of order; index decides.
        let mut captures: Vec<Capture> = plan_sections(&a)
            .into_iter()
            .zip(colors)
            .map(|(s, c)| capture(s, c))
            .collect();
        captures.reverse();

        let out = stitch(&captures, &a, &CaptureOptions::default()).unwrap();
        assert_eq!(out.capture_type, CaptureType::Stitched);
        assert_eq!(out.section_count, 4);
        assert_eq!((out.raster.width, out.raster.height), (800, 1800));

        let px = out.raster.decode().unwrap();
        assert_eq!(px.get_pixel(10, 0).0, [255, 0, 0, 255]);
        // 540..600 is shared by sections 0 and 1; section 1 was drawn last.
        assert_eq!(px.get_pixel(10, 580).0, [0, 255, 0, 255]);
        assert_eq!(px.get_pixel(10, 1100).0, [0, 0, 255, 255]);
        // The clamped last section covers 1200..1800.
        assert_eq!(px.get_pixel(10, 1250).0, [0, 0, 0, 255]);
        assert_eq!(px.get_pixel(10, 1799).0, [0, 0, 0, 255]);
    }

    #[test]
    fn single_covering_capture_is_passed_through() {
        let a = analysis(Size::new(1024, 768), Size::new(1000, 700));
        let section = CaptureSection { x: 0, y: 0, width: 1024, height: 768, index: 0 };
        let only = capture(section, [9, 9, 9, 255]);
        let out = stitch(std::slice::from_ref(&only), &a, &CaptureOptions::default()).unwrap();
        assert_eq!(out.capture_type, CaptureType::Single);
        assert_eq!(out.raster, only.raster);
    }

    #[test]
    fn uncovered_area_is_white() {
        // A wide page is captured at viewport width only.
        let a = analysis(Size::new(100, 100), Size::new(300, 100));
        let section = CaptureSection { x: 0, y: 0, width: 100, height: 100, index: 0 };
        let out = stitch(&[capture(section, [0, 0, 0, 0])], &a, &CaptureOptions::default()).unwrap();
        assert_eq!(out.capture_type, CaptureType::Single);
        assert_eq!((out.raster.width, out.raster.height), (300, 100));
        let px = out.raster.decode().unwrap();
        assert_eq!(px.get_pixel(250, 50).0, [255, 255, 255, 255]);
    }

    #[test]
    fn high_density_captures_are_scaled_to_css_pixels() {
        let a = analysis(Size::new(50, 50), Size::new(50, 120));
        let captures: Vec<Capture> = plan_sections(&a)
            .into_iter()
            .map(|s| Capture {
                raster: solid(Size::new(s.width * 2, s.height * 2), [40, 80, 120, 255]),
                section: s,
                captured_at_millis: 0,
            })
            .collect();
        let out = stitch(&captures, &a, &CaptureOptions::default()).unwrap();
        assert_eq!((out.raster.width, out.raster.height), (50, 120));
        assert_eq!(out.raster.decode().unwrap().get_pixel(25, 119).0, [40, 80, 120, 255]);
    }

    #[test]
    fn jpeg_output_honours_format() {
        let a = analysis(Size::new(64, 64), Size::new(64, 200));
        let captures: Vec<Capture> = plan_sections(&a)
            .into_iter()
            .map(|s| capture(s, [200, 10, 10, 255]))
            .collect();
        let opts = CaptureOptions { format: OutputFormat::Jpeg, quality: 0.8, ..Default::default() };
        let out = stitch(&captures, &a, &opts).unwrap();
        assert_eq!(out.raster.format, OutputFormat::Jpeg);
        assert_eq!((out.raster.width, out.raster.height), (64, 200));
    }
}
