use criterion::{black_box, criterion_group, criterion_main, Criterion};
use chatwire::models::schema::JsonSchema;
use chatwire::models::tool::{Tool, ToolParameters};
use chatwire::providers::llama3::{json_split, parse_generation};

fn tools() -> Vec<Tool> {
    ["add", "search", "get_weather", "send_email"]
        .iter()
        .map(|name| {
            Tool::new(
                *name,
                "benchmark tool",
                ToolParameters::new().with_property("value", JsonSchema::string()),
            )
        })
        .collect()
}

fn benchmark_generation_parser(c: &mut Criterion) {
    let tools = tools();
    let call = r#"{"name": "search", "parameters": {"value": "a \"quoted\" {brace}"}}"#;
    let counts = [1, 10, 100];

    for &count in &counts {
        let calls = vec![call; count].join("\n");
        c.bench_function(&format!("parse_{}_calls", count), |b| {
            b.iter(|| parse_generation(black_box(&tools), black_box(&calls)))
        });
        c.bench_function(&format!("json_split_{}_objects", count), |b| {
            b.iter(|| json_split(black_box(&calls)))
        });
    }

    let prose = "The \"name\" of the tool is not important here. ".repeat(200);
    c.bench_function("parse_prose", |b| {
        b.iter(|| parse_generation(black_box(&tools), black_box(&prose)))
    });
}

criterion_group!(benches, benchmark_generation_parser);
criterion_main!(benches);
