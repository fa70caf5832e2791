use armada_core::{diff_container, ImageResolver, Reconciler};
use armada_runtime::MockRuntime;
use armada_schema::{derive_tag, BuildSpec, Container, DataVolume, Image, Settings, Ship, Volume};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn build_spec(files: usize) -> BuildSpec {
    let mut build = BuildSpec::new(Arc::new(Image::new("debian").with_tag("bookworm")));
    build.steps = (0..20).map(|i| format!("apt-get install -y pkg{i}")).collect();
    for i in 0..20 {
        build.env.insert(format!("VAR_{i}"), format!("value {i}"));
    }
    for i in 0..files {
        build
            .files
            .insert(format!("/etc/app/file{i}.conf"), vec![b'x'; 4096]);
    }
    build
}

fn bench_derive_tag(c: &mut Criterion) {
    let build = build_spec(10);
    c.bench_function("derive_tag_10files", |b| {
        b.iter(|| derive_tag("team/app", &build));
    });
}

fn container(settings: &Settings) -> Container {
    let ship = Arc::new(Ship::local(settings));
    let mut c = Container::new("web", ship, Arc::new(Image::new("nginx").with_tag("1.25")));
    for i in 0..10u16 {
        c.ports.insert(format!("p{i}"), 8000 + i);
    }
    for i in 0..30 {
        c.env.insert(format!("VAR_{i}"), format!("value {i}"));
    }
    for i in 0..5 {
        c.volumes
            .push(Volume::Data(DataVolume::new(&format!("/data/{i}"))));
    }
    c
}

fn bench_diff(c: &mut Criterion) {
    c.bench_function("diff_container_identical", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let settings = Settings {
                    data_volume_dir: dir.path().join("data"),
                    config_volume_dir: dir.path().join("config"),
                    ..Settings::default()
                };
                let rt = MockRuntime::new().with_image("nginx:1.25", "sha256:ng");
                let images = ImageResolver::new();
                let mut web = container(&settings);
                Reconciler::new(&rt, &images, &settings).run(&mut web).unwrap();
                let record = armada_runtime::Runtime::inspect(&rt, "web").unwrap();
                let facts = images.facts(&rt, &web.image).unwrap();
                (dir, settings, web, record, facts)
            },
            |(_dir, settings, web, record, facts)| {
                let diff = diff_container(&web, &facts, &record, &settings).unwrap();
                assert!(diff.is_empty());
            },
        );
    });
}

criterion_group!(benches, bench_derive_tag, bench_diff);
criterion_main!(benches);
