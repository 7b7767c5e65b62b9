use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ferrum_catalog::{
    CatalogIndexes, CatalogPipeline, CatalogStore, DocumentRequest, DocumentSource,
    IndexConfig, MemorySource, PackageSource, PipelineConfig, SourceError,
};
use ferrum_catalog_models::{EntryKind, SpecFamily};
use ferrum_package::FhirPackage;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn package_archive() -> Vec<u8> {
    let files = vec![
        (
            "package/package.json",
            json!({
                "name": "hl7.fhir.us.core",
                "version": "6.1.0",
                "canonical": "http://hl7.org/fhir/us/core",
                "title": "US Core"
            }),
        ),
        (
            "package/StructureDefinition-us-core-patient.json",
            json!({
                "resourceType": "StructureDefinition",
                "id": "us-core-patient",
                "url": "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient",
                "name": "USCorePatientProfile",
                "kind": "resource",
                "type": "Patient",
                "baseDefinition": "http://hl7.org/fhir/StructureDefinition/Patient",
                "derivation": "constraint",
                "snapshot": { "element": [
                    { "id": "Patient", "path": "Patient" },
                    { "id": "Patient.identifier", "path": "Patient.identifier", "min": 1, "max": "*",
                      "type": [{ "code": "Identifier" }], "mustSupport": true },
                    { "id": "Patient.name", "path": "Patient.name", "min": 1, "max": "*",
                      "type": [{ "code": "HumanName" }], "mustSupport": true },
                    { "id": "Patient.birthDate", "path": "Patient.birthDate", "min": 0, "max": "1",
                      "type": [{ "code": "date" }] }
                ]}
            }),
        ),
        (
            "package/StructureDefinition-us-core-race.json",
            json!({
                "resourceType": "StructureDefinition",
                "id": "us-core-race",
                "name": "USCoreRaceExtension",
                "kind": "complex-type",
                "type": "Extension",
                "baseDefinition": "http://hl7.org/fhir/StructureDefinition/Extension",
                "derivation": "constraint",
                "differential": { "element": [
                    { "id": "Extension", "path": "Extension" },
                    { "id": "Extension.extension:ombCategory", "path": "Extension.extension",
                      "sliceName": "ombCategory", "min": 0, "max": "5", "mustSupport": true },
                    { "id": "Extension.extension:text", "path": "Extension.extension",
                      "sliceName": "text", "min": 1, "max": "1", "mustSupport": true }
                ]}
            }),
        ),
    ];

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, value) in files {
        let contents = serde_json::to_vec(&value).unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, contents.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn base_patient() -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "name": "Patient",
        "kind": "resource",
        "type": "Patient",
        "snapshot": { "element": [
            { "path": "Patient" },
            { "path": "Patient.identifier", "min": 0, "max": "*", "type": [{ "code": "Identifier" }] },
            { "path": "Patient.name", "min": 0, "max": "*", "type": [{ "code": "HumanName" }] },
            { "path": "Patient.birthDate", "min": 0, "max": "1", "type": [{ "code": "date" }] }
        ]}
    })
}

fn us_core() -> SpecFamily {
    SpecFamily::new("us-core")
        .with_title("US Core")
        .with_version("6.1.0")
}

fn r4() -> SpecFamily {
    SpecFamily::new("fhir-r4").with_version("4.0.1")
}

/// A shutdown flag nobody will ever raise.
fn no_shutdown() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
async fn package_batch_end_to_end() {
    let package = FhirPackage::from_tar_gz_bytes(&package_archive()).unwrap();
    let source = Arc::new(PackageSource::new(package));
    let requests = source.requests::<&str>(&[]);
    assert!(requests.iter().all(|r| r.is_profile));

    let pipeline = CatalogPipeline::new(PipelineConfig::default());
    let base = pipeline
        .run(
            Arc::new(MemorySource::new().with_document("Patient", base_patient())),
            &r4(),
            vec![DocumentRequest::resource("Patient")],
            no_shutdown(),
        )
        .await;
    let profiles = pipeline.run(source, &us_core(), requests, no_shutdown()).await;
    assert_eq!(profiles.entries.len(), 2);
    assert!(profiles.rejected.is_empty());

    let mut indexes = CatalogIndexes::new(&IndexConfig::default());
    indexes.apply(&base).unwrap();
    indexes.apply(&profiles).unwrap();

    let patient = indexes.resources.get("USCorePatientProfile").unwrap();
    assert_eq!(patient.kind, EntryKind::Profile);
    assert!(patient.base_resolved);
    assert_eq!(patient.must_support_count, 2);

    let race = indexes.resources.get("USCoreRaceExtension").unwrap();
    assert!(!race.base_resolved);
    assert!(indexes.resources.unresolved_bases.contains("USCoreRaceExtension"));

    assert!(indexes
        .elements
        .path("USCoreRaceExtension.extension:ombCategory")
        .is_some());
    assert!(indexes
        .elements
        .path("USCoreRaceExtension.extension:text")
        .is_some());
    assert_eq!(
        indexes.elements.must_support_by_entry["USCoreRaceExtension"].len(),
        1,
        "slices share one field name"
    );
    assert!(indexes
        .elements
        .search("patient")
        .unwrap()
        .contains("USCorePatientProfile"));

    let master = indexes
        .master(&[r4(), us_core()], Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .unwrap();
    assert_eq!(master.stats.total_entries, 3);
    assert_eq!(master.specifications["us-core"].entry_count, 2);
    assert_eq!(master.stats.counters.documents_processed, 3);
}

#[tokio::test]
async fn store_round_trip_enables_incremental_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = CatalogStore::new(dir.path());
    let pipeline = CatalogPipeline::default();
    let source = Arc::new(MemorySource::new().with_document("Patient", base_patient()));

    let outcome = pipeline
        .run(source.clone(), &r4(), vec![DocumentRequest::resource("Patient")], no_shutdown())
        .await;
    let mut indexes = store.load_indexes(&IndexConfig::default()).unwrap();
    indexes.apply(&outcome).unwrap();
    store.write_entries(&outcome.entries).unwrap();
    let master = indexes.master(&[r4()], Utc::now()).unwrap();
    store.write_indexes(&indexes, &master).unwrap();

    for file in ["index/resources.json", "index/elements.json", "index/master.json"] {
        assert!(dir.path().join(file).exists(), "{} should exist", file);
    }

    // Second run starts from disk and sees nothing new.
    let mut reloaded = store.load_indexes(&IndexConfig::default()).unwrap();
    assert_eq!(reloaded.resources, indexes.resources);
    assert_eq!(reloaded.elements, indexes.elements);

    let again = pipeline
        .run(source, &r4(), vec![DocumentRequest::resource("Patient")], no_shutdown())
        .await;
    let report = reloaded.apply(&again).unwrap();
    assert!(report.is_noop());
    assert_eq!(report.unchanged, vec!["Patient"]);
    assert_eq!(store.write_entries(&again.entries).unwrap(), 0);

    let metadata = store
        .read_entry_metadata("fhir-r4", EntryKind::Resource, "Patient")
        .unwrap()
        .unwrap();
    assert_eq!(metadata.element_count, 3);
    assert_eq!(
        &metadata.content_hash,
        &reloaded.resources.get("Patient").unwrap().content_hash
    );
}

#[tokio::test]
async fn duplicate_names_are_left_out_of_the_merge() {
    let mut other = base_patient();
    other["snapshot"]["element"][3]["max"] = json!("*");
    let source = Arc::new(
        MemorySource::new()
            .with_document("Patient", base_patient())
            .with_document("patient-copy", other)
            .with_document(
                "Basic",
                json!({
                    "name": "Basic",
                    "kind": "resource",
                    "snapshot": { "element": [{ "path": "Basic" }, { "path": "Basic.code" }] }
                }),
            ),
    );

    let outcome = CatalogPipeline::default()
        .run(
            source,
            &r4(),
            vec![
                DocumentRequest::resource("Patient"),
                DocumentRequest::resource("patient-copy"),
                DocumentRequest::resource("Basic"),
            ],
            no_shutdown(),
        )
        .await;
    assert_eq!(outcome.entries.len(), 3);

    let mut indexes = CatalogIndexes::new(&IndexConfig::default());
    let report = indexes.apply(&outcome).unwrap();

    assert_eq!(report.added, vec!["Basic".to_string()]);
    assert_eq!(report.duplicates.len(), 2);
    assert!(report.duplicates.iter().all(|d| d.name == "Patient"));
    assert!(indexes.resources.get("Patient").is_none());
    assert!(indexes.elements.path("Patient.birthDate").is_none());
    assert!(indexes.elements.path("Basic.code").is_some());
    assert_eq!(indexes.counters.documents_processed, 1);
    assert_eq!(indexes.counters.documents_rejected, 2);
}

/// Answers "Fast" immediately and stalls on everything else.
struct StallingSource;

#[async_trait]
impl DocumentSource for StallingSource {
    async fn fetch(&self, name: &str) -> Result<Value, SourceError> {
        if name != "Fast" {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(json!({
            "name": name,
            "kind": "resource",
            "snapshot": { "element": [{ "path": format!("{}.id", name) }] }
        }))
    }
}

#[tokio::test]
async fn cancellation_keeps_completed_entries() {
    let (tx, shutdown) = watch::channel(false);
    let pipeline = CatalogPipeline::new(PipelineConfig {
        max_concurrent_documents: 4,
        queue_capacity: 4,
    });

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(true);
    });

    let outcome = pipeline
        .run(
            Arc::new(StallingSource),
            &r4(),
            vec![
                DocumentRequest::resource("Fast"),
                DocumentRequest::resource("Slow"),
                DocumentRequest::resource("Slower"),
            ],
            shutdown,
        )
        .await;

    assert!(outcome.cancelled);
    assert_eq!(outcome.entries.len(), 1);
    assert_eq!(outcome.entries[0].name, "Fast");

    // A partial batch is still a valid input for aggregation.
    let mut indexes = CatalogIndexes::new(&IndexConfig::default());
    indexes.apply(&outcome).unwrap();
    assert!(indexes.elements.path("Fast.id").is_some());
}

/// Records how many fetches are in flight at once.
#[derive(Default)]
struct CountingSource {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl DocumentSource for CountingSource {
    async fn fetch(&self, name: &str) -> Result<Value, SourceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(json!({
            "name": name,
            "kind": "resource",
            "snapshot": { "element": [{ "path": format!("{}.id", name) }] }
        }))
    }
}

#[tokio::test]
async fn fetches_never_exceed_the_concurrency_limit() {
    let source = Arc::new(CountingSource::default());
    let pipeline = CatalogPipeline::new(PipelineConfig {
        max_concurrent_documents: 2,
        queue_capacity: 4,
    });
    let requests: Vec<_> = (0..10)
        .map(|i| DocumentRequest::resource(format!("Resource{}", i)))
        .collect();

    let outcome = pipeline
        .run(Arc::clone(&source), &r4(), requests, no_shutdown())
        .await;

    assert_eq!(outcome.entries.len(), 10);
    assert!(outcome.rejected.is_empty());
    let peak = source.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {}", peak);
    assert_eq!(source.in_flight.load(Ordering::SeqCst), 0);
}
