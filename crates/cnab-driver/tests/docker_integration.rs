//! Runs a real invocation image through the docker daemon.
//!
//! Ignored by default: `cargo test -p cnab-driver -- --ignored` with a
//! working docker client. `DOCKER_INTEGRATION_TEST_IMAGE` overrides the
//! image under test.

use std::collections::BTreeMap;

use cnab_core::bundle::{Bundle, InvocationImage, Output};
use cnab_core::schema::Schema;
use cnab_driver::{BufferSink, Context, DockerDriver, Driver, Operation};

fn image() -> InvocationImage {
    match std::env::var("DOCKER_INTEGRATION_TEST_IMAGE") {
        Ok(image) => InvocationImage::new(image),
        Err(_) => InvocationImage::new("pvtlmc/example-outputs").with_digest(
            "sha256:568461508c8d220742add8abd226b33534d4269868df4b3178fae1cba3818a6e",
        ),
    }
}

fn operation(out: &BufferSink) -> Operation {
    let mut bundle = Bundle::new("example-outputs", "0.1.0");
    for name in ["output1", "output2"] {
        bundle.definitions.insert(name.into(), Schema::default());
        bundle.outputs.insert(
            name.into(),
            Output {
                definition: name.into(),
                ..Default::default()
            },
        );
    }

    Operation {
        installation: "example".into(),
        action: "install".into(),
        image: image(),
        environment: BTreeMap::from([
            ("CNAB_ACTION".to_string(), "install".to_string()),
            ("CNAB_INSTALLATION_NAME".to_string(), "example".to_string()),
        ]),
        outputs: BTreeMap::from([
            ("/cnab/app/outputs/output1".to_string(), "output1".to_string()),
            ("/cnab/app/outputs/output2".to_string(), "output2".to_string()),
        ]),
        bundle: Some(bundle),
        out: Some(out.boxed()),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn install_writes_outputs() {
    let out = BufferSink::new();
    let result = DockerDriver::from_env()
        .run(&Context::background(), operation(&out))
        .await
        .unwrap();

    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(
        out.contents_lossy(),
        "Install action\nAction install complete for example\n"
    );
    assert_eq!(
        result.outputs,
        BTreeMap::from([
            ("output1".to_string(), b"SOME INSTALL CONTENT 1\n".to_vec()),
            ("output2".to_string(), b"SOME INSTALL CONTENT 2\n".to_vec()),
        ])
    );
}

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn cancelled_run_prints_nothing() {
    let out = BufferSink::new();
    let (ctx, handle) = Context::with_cancel();
    handle.cancel();

    let err = DockerDriver::from_env()
        .run(&ctx, operation(&out))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("context canceled"), "got {err}");
    assert!(out.is_empty());
}
