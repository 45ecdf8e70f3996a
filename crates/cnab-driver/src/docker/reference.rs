//! Image reference validation and digest pinning.

use std::sync::OnceLock;

use regex::Regex;

use cnab_core::bundle::InvocationImage;
use cnab_core::{CnabError, Result};

static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();
static DIGEST_RE: OnceLock<Regex> = OnceLock::new();

/// `[registry[:port]/]path[:tag][@digest]`, path components lowercase.
fn reference_re() -> &'static Regex {
    REFERENCE_RE.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::[0-9]+)?/)?",
            r"[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*",
            r"(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*",
            r"(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?",
            r"(?:@sha256:[a-f0-9]{64})?$",
        ))
        .unwrap()
    })
}

fn digest_re() -> &'static Regex {
    DIGEST_RE.get_or_init(|| Regex::new(r"^sha256:[a-f0-9]{64}$").unwrap())
}

/// The reference to create the container from.
///
/// A content digest, when present, pins the reference (`image@digest`) so
/// the exact bytes the bundle was built with are run.
pub fn resolve(image: &InvocationImage) -> Result<String> {
    let reference = image.image.trim();
    if reference.is_empty() {
        return Err(CnabError::Configuration(
            "invocation image reference is empty".into(),
        ));
    }
    if !reference_re().is_match(reference) {
        return Err(CnabError::Configuration(format!(
            "invalid image reference '{reference}'"
        )));
    }

    let Some(digest) = image.content_digest.as_deref().filter(|d| !d.is_empty()) else {
        return Ok(reference.to_string());
    };
    if !digest_re().is_match(digest) {
        return Err(CnabError::Configuration(format!(
            "invalid content digest '{digest}' for image {reference}"
        )));
    }

    match reference.split_once('@') {
        Some((_, existing)) if existing == digest => Ok(reference.to_string()),
        Some((_, existing)) => Err(CnabError::Configuration(format!(
            "image {reference} is pinned to {existing}, which does not match content digest {digest}"
        ))),
        None => Ok(format!("{reference}@{digest}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:568461508c8d220742add8abd226b33534d4269868df4b3178fae1cba3818a6e";

    #[test]
    fn accepts_common_references() {
        for ok in [
            "pvtlmc/example-outputs",
            "example.com/myorg/myinstaller",
            "localhost:5000/app:v1.2.3",
            "ubuntu",
        ] {
            assert_eq!(resolve(&InvocationImage::new(ok)).unwrap(), ok);
        }
    }

    #[test]
    fn rejects_malformed_references() {
        for bad in ["", "  ", "Has Space", "myorg/UPPER", "app:"] {
            let err = resolve(&InvocationImage::new(bad)).unwrap_err();
            assert!(matches!(err, CnabError::Configuration(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn digest_pins_reference() {
        let image = InvocationImage::new("pvtlmc/example-outputs").with_digest(DIGEST);
        assert_eq!(
            resolve(&image).unwrap(),
            format!("pvtlmc/example-outputs@{DIGEST}")
        );

        let already = InvocationImage::new(format!("pvtlmc/example-outputs@{DIGEST}"))
            .with_digest(DIGEST);
        assert_eq!(resolve(&already).unwrap(), already.image);
    }

    #[test]
    fn bad_or_conflicting_digest_is_rejected() {
        let bad = InvocationImage::new("pvtlmc/example-outputs").with_digest("sha256:abc");
        assert!(resolve(&bad).is_err());

        let other = "sha256:7cc0618539fe11e801ce68911a0c9441a3dfaa9ba63057526c4016cf9db19474";
        let conflict =
            InvocationImage::new(format!("pvtlmc/example-outputs@{other}")).with_digest(DIGEST);
        assert!(resolve(&conflict).is_err());
    }
}
