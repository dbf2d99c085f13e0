use criterion::{Criterion, black_box, criterion_group, criterion_main};
use evidex_connectors::openalex::{parse_works_response, reconstruct_abstract};
use evidex_connectors::oracles::extract_json_object;
use evidex_connectors::pubmed::parse_esummary;
use serde_json::json;

fn esummary_fixture(n: usize) -> (serde_json::Value, Vec<String>) {
    let pmids: Vec<String> = (0..n).map(|i| (30_000_000 + i).to_string()).collect();
    let mut result = serde_json::Map::new();
    result.insert("uids".into(), json!(pmids));
    for pmid in &pmids {
        result.insert(
            pmid.clone(),
            json!({
                "uid": pmid,
                "pubdate": "2021 Mar",
                "fulljournalname": "Critical Care",
                "title": format!("Carbon dioxide gap and outcome in septic shock {pmid}"),
                "authors": [{"name": "Mallat J", "authtype": "Author"}],
                "pubtype": ["Journal Article", "Observational Study"],
                "articleids": [{"idtype": "doi", "value": format!("10.1186/{pmid}")}]
            }),
        );
    }
    (json!({ "result": result }), pmids)
}

fn inverted_index(words: usize) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for i in 0..words {
        map.insert(format!("w{i}"), json!([i]));
    }
    serde_json::Value::Object(map)
}

fn bench_parsers(c: &mut Criterion) {
    let (summary, pmids) = esummary_fixture(50);
    c.bench_function("pubmed_parse_esummary_50", |b| {
        b.iter(|| parse_esummary(black_box(&summary), black_box(&pmids)))
    });

    let index = inverted_index(250);
    c.bench_function("openalex_reconstruct_abstract_250", |b| {
        b.iter(|| reconstruct_abstract(black_box(&index)))
    });

    let works = json!({
        "results": (0..25).map(|i| json!({
            "id": format!("https://openalex.org/W{i}"),
            "display_name": format!("Work {i}"),
            "abstract_inverted_index": inverted_index(120),
        })).collect::<Vec<_>>()
    });
    c.bench_function("openalex_parse_works_25", |b| {
        b.iter(|| parse_works_response(black_box(&works)))
    });
}

fn bench_json_extraction(c: &mut Criterion) {
    let reply = format!(
        "Here is the plan you asked for.\n```json\n{}\n```\nLet me know.",
        json!({
            "refined_query": "arteriovenous carbon dioxide gap septic shock",
            "strategies": (0..6).map(|i| json!({"source": "pubmed", "query": format!("q{i}")})).collect::<Vec<_>>()
        })
    );
    c.bench_function("extract_json_object_fenced", |b| {
        b.iter(|| extract_json_object(black_box(&reply)))
    });
}

criterion_group!(benches, bench_parsers, bench_json_extraction);
criterion_main!(benches);
