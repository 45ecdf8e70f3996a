use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::context::Context;
use crate::driver::Driver;
use crate::operation::{Operation, OperationResult};
use cnab_core::Result;

/// Prints the operation it is given instead of running anything.
///
/// Output is pretty-printed JSON with map keys in sorted order, so the same
/// operation always prints the same text.
#[derive(Debug, Default, Clone)]
pub struct DebugDriver;

impl DebugDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for DebugDriver {
    fn name(&self) -> &str {
        "debug"
    }

    fn handles(&self, _image_type: &str) -> bool {
        true
    }

    async fn run(&self, ctx: &Context, mut op: Operation) -> Result<OperationResult> {
        ctx.check()?;

        let mut text = serde_json::to_string_pretty(&op)?;
        text.push('\n');
        debug!(installation = %op.installation, action = %op.action, "debug driver run");

        match op.out.as_mut() {
            Some(out) => {
                out.write_all(text.as_bytes()).await?;
                out.flush().await?;
            }
            None => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
        Ok(OperationResult::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;
    use cnab_core::bundle::InvocationImage;

    fn op(out: &BufferSink) -> Operation {
        let mut op = Operation {
            installation: "hello".into(),
            revision: "claim-rev".into(),
            action: "install".into(),
            image: InvocationImage::new("example.com/myorg/myinstaller"),
            out: Some(out.boxed()),
            ..Default::default()
        };
        op.environment.insert("CNAB_ACTION".into(), "install".into());
        op.outputs
            .insert("/cnab/app/outputs/output1".into(), "output1".into());
        op
    }

    #[tokio::test]
    async fn prints_operation_and_returns_no_outputs() {
        let sink = BufferSink::new();
        let result = DebugDriver::new()
            .run(&Context::background(), op(&sink))
            .await
            .unwrap();

        assert!(result.outputs.is_empty());
        assert!(result.is_success());
        let text = sink.contents_lossy();
        assert!(text.starts_with("{\n  \"installation_name\": \"hello\",\n  \"revision\": \"claim-rev\""));
        assert!(text.contains("\"CNAB_ACTION\": \"install\""));
        assert!(text.ends_with("}\n"));
    }

    #[tokio::test]
    async fn output_is_identical_across_runs() {
        let first = BufferSink::new();
        let second = BufferSink::new();
        let driver = DebugDriver::new();
        driver.run(&Context::background(), op(&first)).await.unwrap();
        driver.run(&Context::background(), op(&second)).await.unwrap();
        assert_eq!(first.contents(), second.contents());
    }

    #[tokio::test]
    async fn cancelled_context_prints_nothing() {
        let sink = BufferSink::new();
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();
        let err = DebugDriver::new().run(&ctx, op(&sink)).await.unwrap_err();
        assert!(err.to_string().contains("context canceled"));
        assert!(sink.is_empty());
    }
}
