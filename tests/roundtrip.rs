//! End-to-end archive round trips through the flat store file format.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use car::compression::ZlibBackend;
use car::format::{Layout, ResizeMode, RENDITIONS_VARIABLE};
use car::rendition::Slice;
use car::store::{ContainerSource, FlatStoreReader, FlatStoreWriter};
use car::{
    AttributeIdentifier, AttributeList, Error, Facet, PixelDataFormat, Reader, Rendition,
    RenditionData, Writer,
};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn attributes(pairs: &[(AttributeIdentifier, u16)]) -> AttributeList {
    pairs.iter().copied().collect()
}

fn bgra_pixels(width: u32, height: u32) -> Vec<u8> {
    (0..width * height * 4).map(|i| (i % 251) as u8).collect()
}

fn bgra_rendition(identifier: u16, scale: u16, width: u32, height: u32) -> Rendition {
    let mut rendition = Rendition::create(
        attributes(&[
            (AttributeIdentifier::Identifier, identifier),
            (AttributeIdentifier::Scale, scale),
        ]),
        RenditionData::new(bgra_pixels(width, height), PixelDataFormat::PremultipliedBGRA8),
    );
    rendition.set_width(width);
    rendition.set_height(height);
    rendition.set_scale(scale as f32);
    rendition.set_file_name(format!("asset-{}@{}x.png", identifier, scale));
    rendition
}

#[test]
fn test_file_round_trip_preserves_entities_and_pixels() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Assets.car");

    let mut store = FlatStoreWriter::create(&path).unwrap();
    let mut writer = Writer::new(&mut store);

    writer.add_facet(Facet::create(
        "AppIcon",
        attributes(&[(AttributeIdentifier::Identifier, 1)]),
    ));
    writer.add_facet(Facet::create(
        "LaunchImage",
        attributes(&[(AttributeIdentifier::Identifier, 2)]),
    ));
    writer.add_rendition(bgra_rendition(1, 1, 8, 8));
    writer.add_rendition(bgra_rendition(1, 2, 16, 16));
    writer.add_rendition(bgra_rendition(2, 1, 4, 2));

    let mut rng = StdRng::seed_from_u64(42);
    let report = writer.write_with(&mut rng, &ZlibBackend).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.facet_count, 2);
    assert_eq!(report.rendition_count, 3);

    let reader = Reader::new(FlatStoreReader::open(&path).unwrap()).unwrap();
    assert_eq!(reader.rendition_count(), 3);
    assert_eq!(reader.facet_count().unwrap(), 2);

    // Facets come back in name order.
    let mut names = Vec::new();
    reader
        .facet_iterate(|facet| names.push(facet.name().to_string()))
        .unwrap();
    assert_eq!(names, vec!["AppIcon", "LaunchImage"]);

    // Every rendition decodes to its original pixels.
    let mut seen = 0;
    reader
        .rendition_iterate(|rendition| {
            seen += 1;
            let decoded = rendition.data().unwrap();
            assert_eq!(decoded.format(), PixelDataFormat::PremultipliedBGRA8);
            assert_eq!(
                decoded.data(),
                &bgra_pixels(rendition.width(), rendition.height())[..]
            );
        })
        .unwrap();
    assert_eq!(seen, 3);
}

#[test]
fn test_facet_joins_its_renditions() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Assets.car");

    let mut store = FlatStoreWriter::create(&path).unwrap();
    let mut writer = Writer::new(&mut store);
    writer.add_facet(Facet::create(
        "AppIcon",
        attributes(&[(AttributeIdentifier::Identifier, 1)]),
    ));
    writer.add_rendition(bgra_rendition(1, 1, 4, 4));
    writer.add_rendition(bgra_rendition(1, 3, 12, 12));
    writer.add_rendition(bgra_rendition(9, 1, 4, 4)); // different facet

    let mut rng = StdRng::seed_from_u64(7);
    writer.write_with(&mut rng, &ZlibBackend).unwrap();

    let reader = Reader::new(FlatStoreReader::open(&path).unwrap()).unwrap();
    let facet = reader.facet("AppIcon").unwrap().unwrap();

    let mut scales = Vec::new();
    facet
        .rendition_iterate(&reader, |rendition| {
            scales.push(rendition.attributes().get(AttributeIdentifier::Scale));
        })
        .unwrap();
    scales.sort();
    assert_eq!(scales, vec![Some(1), Some(3)]);
}

#[test]
fn test_resizable_rendition_round_trips_slices() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Assets.car");

    let slices = [
        Slice { x: 0, y: 0, width: 4, height: 12 },
        Slice { x: 4, y: 0, width: 8, height: 12 },
        Slice { x: 12, y: 0, width: 4, height: 12 },
    ];

    let mut store = FlatStoreWriter::create(&path).unwrap();
    let mut writer = Writer::new(&mut store);
    let mut rendition = bgra_rendition(5, 1, 16, 12);
    rendition.set_layout(Layout::ThreePartHorizontalScale);
    rendition.set_slices(slices);
    writer.add_rendition(rendition);

    let mut rng = StdRng::seed_from_u64(5);
    writer.write_with(&mut rng, &ZlibBackend).unwrap();

    let reader = Reader::new(FlatStoreReader::open(&path).unwrap()).unwrap();
    reader
        .rendition_iterate(|rendition| {
            assert_eq!(rendition.layout(), Layout::ThreePartHorizontalScale);
            assert!(rendition.is_resizable());
            assert_eq!(rendition.resize_mode(), ResizeMode::Scale);
            assert_eq!(rendition.slices(), &slices[..]);
        })
        .unwrap();
}

#[test]
fn test_key_format_is_stable_across_writes() {
    init_tracing();
    let write_archive = |path: &std::path::Path, seed: u64| {
        let mut store = FlatStoreWriter::create(path).unwrap();
        let mut writer = Writer::new(&mut store);
        writer.add_facet(Facet::create(
            "icon",
            attributes(&[
                (AttributeIdentifier::Idiom, 1),
                (AttributeIdentifier::Identifier, 3),
            ]),
        ));
        writer.add_rendition(bgra_rendition(3, 2, 4, 4));
        let mut rng = StdRng::seed_from_u64(seed);
        writer.write_with(&mut rng, &ZlibBackend).unwrap();
    };

    let dir = TempDir::new().unwrap();
    let first = dir.path().join("a.car");
    let second = dir.path().join("b.car");
    write_archive(&first, 1);
    write_archive(&second, 2);

    let a = Reader::new(FlatStoreReader::open(&first).unwrap()).unwrap();
    let b = Reader::new(FlatStoreReader::open(&second).unwrap()).unwrap();
    assert_eq!(a.key_format(), b.key_format());
    assert_eq!(
        a.key_format(),
        &[
            AttributeIdentifier::Scale as u32,
            AttributeIdentifier::Idiom as u32,
            AttributeIdentifier::Identifier as u32,
        ]
    );

    // Rendition keys come out byte-identical too.
    let collect_keys = |path: &std::path::Path| {
        let source = FlatStoreReader::open(path).unwrap();
        let mut keys = Vec::new();
        source
            .tree_iterate(RENDITIONS_VARIABLE, &mut |key, _| {
                keys.push(key.to_vec());
                Ok(())
            })
            .unwrap();
        keys
    };
    assert_eq!(collect_keys(&first), collect_keys(&second));
}

#[test]
fn test_encode_failure_degrades_not_aborts() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Assets.car");

    let mut store = FlatStoreWriter::create(&path).unwrap();
    let mut writer = Writer::new(&mut store);

    let mut opaque = Rendition::create(
        attributes(&[(AttributeIdentifier::Identifier, 4)]),
        RenditionData::new(vec![0xAB; 32], PixelDataFormat::Data),
    );
    opaque.set_file_name("raw.dat");
    writer.add_rendition(opaque);
    writer.add_rendition(bgra_rendition(8, 1, 4, 4));

    let mut rng = StdRng::seed_from_u64(3);
    let report = writer.write_with(&mut rng, &ZlibBackend).unwrap();
    assert_eq!(report.rendition_count, 2);
    assert_eq!(report.encode_failures.len(), 1);
    assert_eq!(report.encode_failures[0].file_name, "raw.dat");

    // The degraded record is still present; its payload just cannot decode.
    let reader = Reader::new(FlatStoreReader::open(&path).unwrap()).unwrap();
    let mut degraded = 0;
    let mut decoded = 0;
    reader
        .rendition_iterate(|rendition| {
            if rendition.file_name() == "raw.dat" {
                degraded += 1;
                assert!(matches!(
                    rendition.data(),
                    Err(Error::UnsupportedPixelFormat(_))
                ));
            } else {
                decoded += 1;
                assert!(rendition.data().is_ok());
            }
        })
        .unwrap();
    assert_eq!(degraded, 1);
    assert_eq!(decoded, 1);
}

#[test]
fn test_reader_without_mmap_matches_mmap() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Assets.car");

    let mut store = FlatStoreWriter::create(&path).unwrap();
    let mut writer = Writer::new(&mut store);
    writer.add_rendition(bgra_rendition(1, 1, 8, 8));
    let mut rng = StdRng::seed_from_u64(9);
    writer.write_with(&mut rng, &ZlibBackend).unwrap();

    let collect = |source: FlatStoreReader| {
        let reader = Reader::new(source).unwrap();
        let mut pixels = Vec::new();
        reader
            .rendition_iterate(|rendition| {
                pixels.push(rendition.data().unwrap().data().to_vec());
            })
            .unwrap();
        pixels
    };

    let mapped = collect(FlatStoreReader::open(&path).unwrap());
    let buffered = collect(FlatStoreReader::open_opts(&path, false).unwrap());
    assert_eq!(mapped, buffered);
}
