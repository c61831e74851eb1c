use criterion::{black_box, criterion_group, criterion_main, Criterion};
use margin_collab::element::{Bounds, Color, Element, ElementBody, ElementPatch};
use margin_collab::merge::MergeEngine;
use margin_collab::protocol::{CursorPos, Operation, WireMessage};
use margin_collab::view::DerivedViews;
use uuid::Uuid;

fn text_element(id: u128, origin: Uuid) -> Element {
    Element::new(
        Uuid::from_u128(id),
        0,
        Bounds::new(10.0, 10.0, 50.0, 20.0),
        ElementBody::Text {
            text: "benchmark".into(),
            font_size: 12.0,
            color: Color::BLACK,
        },
        0,
        origin,
    )
}

fn bench_op_encode(c: &mut Criterion) {
    let origin = Uuid::new_v4();
    let op = Operation::add(Uuid::new_v4(), origin, 1, 0, text_element(1, origin));
    let frame = WireMessage::Op(op);

    c.bench_function("op_encode_text_add", |b| {
        b.iter(|| black_box(frame.encode().unwrap()))
    });
}

fn bench_op_decode(c: &mut Criterion) {
    let origin = Uuid::new_v4();
    let op = Operation::add(Uuid::new_v4(), origin, 1, 0, text_element(1, origin));
    let encoded = WireMessage::Op(op).encode().unwrap();

    c.bench_function("op_decode_text_add", |b| {
        b.iter(|| black_box(WireMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_cursor_encode(c: &mut Criterion) {
    let op = Operation::cursor(Uuid::new_v4(), Uuid::new_v4(), 1, 0, CursorPos::new(1.0, 2.0, 0));
    let frame = WireMessage::Op(op);

    c.bench_function("cursor_encode", |b| {
        b.iter(|| black_box(frame.encode().unwrap()))
    });
}

fn bench_merge_add_1k(c: &mut Criterion) {
    let origin = Uuid::new_v4();
    let ops: Vec<Operation> = (0..1_000u64)
        .map(|i| {
            Operation::add(
                Uuid::from_u128(10_000 + i as u128),
                origin,
                i + 1,
                0,
                text_element(i as u128 + 1, origin),
            )
        })
        .collect();

    c.bench_function("merge_apply_1k_adds", |b| {
        b.iter(|| {
            let mut engine = MergeEngine::default();
            for op in &ops {
                black_box(engine.apply(op));
            }
            black_box(engine.live_count())
        })
    });
}

fn bench_merge_update_hot_element(c: &mut Criterion) {
    let origin = Uuid::new_v4();
    let mut engine = MergeEngine::default();
    engine.apply(&Operation::add(Uuid::new_v4(), origin, 1, 0, text_element(1, origin)));

    let mut version = 1u64;
    c.bench_function("merge_apply_update", |b| {
        b.iter(|| {
            version += 1;
            let op = Operation::update(
                Uuid::new_v4(),
                origin,
                version,
                0,
                Uuid::from_u128(1),
                ElementPatch::with_bounds(Bounds::new(1.0, 2.0, 3.0, 4.0)),
            );
            black_box(engine.apply(&op))
        })
    });
}

fn bench_view_refresh_1k(c: &mut Criterion) {
    let origin = Uuid::new_v4();
    let mut engine = MergeEngine::default();
    for i in 0..1_000u64 {
        engine.apply(&Operation::add(
            Uuid::from_u128(10_000 + i as u128),
            origin,
            i + 1,
            0,
            text_element(i as u128 + 1, origin),
        ));
    }

    c.bench_function("view_refresh_1k_elements", |b| {
        b.iter(|| {
            let mut views = DerivedViews::new();
            views.refresh(black_box(&engine));
            black_box(views.element_count())
        })
    });
}

criterion_group!(
    benches,
    bench_op_encode,
    bench_op_decode,
    bench_cursor_encode,
    bench_merge_add_1k,
    bench_merge_update_hot_element,
    bench_view_refresh_1k,
);
criterion_main!(benches);
