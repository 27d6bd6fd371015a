use criterion::{criterion_group, criterion_main, Criterion};
use rfcapture::analysis::ScrollOffset;
use rfcapture::simulated::banded_content;
use rfcapture::stitch::stitch;
use rfcapture::{plan_sections, Capture, CaptureOptions, OutputFormat, PageAnalysis, Raster, Size};

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

fn bench_plan_sections(c: &mut Criterion) {
    let a = analysis(Size::new(1280, 720), Size::new(1280, 50_000));
    c.bench_function("plan_sections_50k", |b| {
        b.iter(|| plan_sections(criterion::black_box(&a)))
    });
}

fn bench_stitch(c: &mut Criterion) {
    let viewport = Size::new(800, 600);
    let page = Size::new(800, 3000);
    let a = analysis(viewport, page);
    let content = banded_content(page);

    // Pre-encode each section the way a host would deliver it
    let captures: Vec<Capture> = plan_sections(&a)
        .into_iter()
        .map(|section| {
            let tile = image::imageops::crop_imm(&content, section.x, section.y, section.width, section.height).to_image();
            Capture {
                raster: Raster::encode(&tile, OutputFormat::Png, 1.0).expect("encode tile"),
                section,
                captured_at_millis: 0,
            }
        })
        .collect();
    let options = CaptureOptions::default();

    c.bench_function("stitch_800x3000", |b| {
        b.iter(|| stitch(criterion::black_box(&captures), &a, &options).unwrap())
    });
}

criterion_group!(benches, bench_plan_sections, bench_stitch);
criterion_main!(benches);
