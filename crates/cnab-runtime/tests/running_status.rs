//! Upgrade an installation through the debug driver, recording a `running`
//! result first, and check the printed operation byte for byte.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use cnab_core::bundle::{Bundle, BundleAction, InvocationImage, ACTION_INSTALL, ACTION_UPGRADE};
use cnab_core::claim::{Claim, Status};
use cnab_core::ClaimStore;
use cnab_driver::{BufferSink, Context, DriverRegistry, Operation, OperationConfig};
use cnab_runtime::{ActionRunner, CredentialSet};

const EXPECTED: &str = r#"{
  "installation_name": "hello",
  "revision": "claim-rev",
  "action": "upgrade",
  "parameters": null,
  "image": {
    "imageType": "docker",
    "image": "example.com/myorg/myinstaller",
    "contentDigest": "sha256:7cc0618539fe11e801ce68911a0c9441a3dfaa9ba63057526c4016cf9db19474"
  },
  "environment": {
    "CNAB_ACTION": "upgrade",
    "CNAB_BUNDLE_NAME": "mybuns",
    "CNAB_BUNDLE_VERSION": "1.0.0",
    "CNAB_CLAIMS_VERSION": "1.0.0-DRAFT+b5ed2f3",
    "CNAB_INSTALLATION_NAME": "hello",
    "CNAB_REVISION": "claim-rev"
  },
  "files": {
    "/cnab/app/image-map.json": "{}",
    "/cnab/bundle.json": "{\"schemaVersion\":\"1.0.1\",\"name\":\"mybuns\",\"version\":\"1.0.0\",\"description\":\"\",\"invocationImages\":[{\"imageType\":\"docker\",\"image\":\"example.com/myorg/myinstaller\",\"contentDigest\":\"sha256:7cc0618539fe11e801ce68911a0c9441a3dfaa9ba63057526c4016cf9db19474\"}],\"actions\":{\"logs\":{}}}",
    "/cnab/claim.json": "{\"schemaVersion\":\"1.0.0-DRAFT+b5ed2f3\",\"id\":\"claim-id\",\"installation\":\"hello\",\"revision\":\"claim-rev\",\"created\":\"2020-04-18T01:02:03.000000004Z\",\"action\":\"upgrade\",\"bundle\":{\"schemaVersion\":\"1.0.1\",\"name\":\"mybuns\",\"version\":\"1.0.0\",\"description\":\"\",\"invocationImages\":[{\"imageType\":\"docker\",\"image\":\"example.com/myorg/myinstaller\",\"contentDigest\":\"sha256:7cc0618539fe11e801ce68911a0c9441a3dfaa9ba63057526c4016cf9db19474\"}],\"actions\":{\"logs\":{}}}}"
  },
  "outputs": {},
  "Bundle": {
    "schemaVersion": "1.0.1",
    "name": "mybuns",
    "version": "1.0.0",
    "description": "",
    "invocationImages": [
      {
        "imageType": "docker",
        "image": "example.com/myorg/myinstaller",
        "contentDigest": "sha256:7cc0618539fe11e801ce68911a0c9441a3dfaa9ba63057526c4016cf9db19474"
      }
    ],
    "actions": {
      "logs": {}
    }
  }
}
"#;

fn bundle() -> Bundle {
    let mut b = Bundle::new("mybuns", "1.0.0");
    b.invocation_images.push(
        InvocationImage::new("example.com/myorg/myinstaller").with_digest(
            "sha256:7cc0618539fe11e801ce68911a0c9441a3dfaa9ba63057526c4016cf9db19474",
        ),
    );
    b.actions.insert("logs".into(), BundleAction::default());
    b
}

fn create_install_claim(claims: &ClaimStore) {
    let c = Claim::new("hello", ACTION_INSTALL, bundle(), None).unwrap();
    claims.save_claim(&c).unwrap();
    claims.save_result(&c.new_result(Status::Succeeded)).unwrap();
}

/// The upgrade claim with fixed identity so its files are reproducible.
fn upgrade_claim(claims: &ClaimStore) -> Claim {
    let existing = claims.read_last_claim("hello").unwrap();
    let mut c = existing
        .derive(ACTION_UPGRADE, existing.bundle.clone(), None)
        .unwrap();
    assert_eq!(c.installation, existing.installation);
    assert_ne!(c.revision, existing.revision);

    c.id = "claim-id".into();
    c.revision = "claim-rev".into();
    c.created = Utc.with_ymd_and_hms(2020, 4, 18, 1, 2, 3).unwrap() + Duration::nanoseconds(4);
    c
}

fn print_to(sink: &BufferSink) -> Vec<OperationConfig> {
    let sink = sink.clone();
    let attach: OperationConfig = Box::new(move |op: &mut Operation| {
        op.out = Some(sink.boxed());
        Ok(())
    });
    vec![attach]
}

#[tokio::test]
async fn upgrade_records_running_then_succeeded() {
    let claims = Arc::new(ClaimStore::in_memory());
    create_install_claim(&claims);
    let c = upgrade_claim(&claims);

    let runner = ActionRunner::new(Arc::new(DriverRegistry::with_defaults()), claims.clone())
        .with_driver("debug")
        .with_save_all_outputs(true);

    runner.save_initial_claim(&c, Status::Running).unwrap();

    let sink = BufferSink::new();
    let (op_result, mut result) = runner
        .run(&Context::background(), &c, &CredentialSet::new(), print_to(&sink))
        .await
        .unwrap();
    runner
        .save_operation_result(op_result, &c, &mut result)
        .unwrap();

    assert_eq!(sink.contents_lossy(), EXPECTED);

    let results = claims.list_results(&c.id).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, Status::Running);
    assert_eq!(results[1].status, Status::Succeeded);
}

#[tokio::test]
async fn repeated_runs_print_identical_operations() {
    let claims = Arc::new(ClaimStore::in_memory());
    create_install_claim(&claims);
    let c = upgrade_claim(&claims);
    let runner = ActionRunner::new(Arc::new(DriverRegistry::with_defaults()), claims.clone())
        .with_driver("debug");

    let first = BufferSink::new();
    let second = BufferSink::new();
    for sink in [&first, &second] {
        runner
            .run(&Context::background(), &c, &CredentialSet::new(), print_to(sink))
            .await
            .unwrap();
    }
    assert_eq!(first.contents(), second.contents());
    assert_eq!(first.contents_lossy(), EXPECTED);
}
