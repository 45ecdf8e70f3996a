//! Name → driver lookup.
//!
//! A registry is built once by the caller and handed to the action runner;
//! there is no process-wide default.

use std::collections::BTreeMap;
use std::sync::Arc;

use cnab_core::bundle::InvocationImage;
use cnab_core::{CnabError, Result};

use crate::debug::DebugDriver;
use crate::docker::DockerDriver;
use crate::driver::Driver;

#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `docker` (also reachable as `oci`) and `debug`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let docker: Arc<dyn Driver> = Arc::new(DockerDriver::from_env());
        registry.register_as("docker", Arc::clone(&docker));
        registry.register_as("oci", docker);
        registry.register(DebugDriver::new());
        registry
    }

    /// Register `driver` under its own name, replacing any previous entry.
    pub fn register<D: Driver + 'static>(&mut self, driver: D) {
        let name = driver.name().to_string();
        self.drivers.insert(name, Arc::new(driver));
    }

    pub fn register_as(&mut self, name: impl Into<String>, driver: Arc<dyn Driver>) {
        self.drivers.insert(name.into(), driver);
    }

    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.drivers.get(name).cloned().ok_or_else(|| {
            CnabError::Configuration(format!(
                "unsupported driver '{name}' (available: {})",
                self.names().join(", ")
            ))
        })
    }

    /// The driver registered under the image's type.
    pub fn for_image(&self, image: &InvocationImage) -> Result<Arc<dyn Driver>> {
        let driver = self.lookup(&image.image_type)?;
        if !driver.handles(&image.image_type) {
            return Err(CnabError::Configuration(format!(
                "driver '{}' does not support image type '{}'",
                driver.name(),
                image.image_type
            )));
        }
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_docker_and_debug() {
        let registry = DriverRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["debug", "docker", "oci"]);
        assert_eq!(registry.lookup("oci").unwrap().name(), "docker");
        assert_eq!(registry.lookup("debug").unwrap().name(), "debug");
    }

    #[test]
    fn unknown_driver_is_a_configuration_error() {
        let registry = DriverRegistry::with_defaults();
        let err = registry.lookup("kubernetes").err().unwrap();
        assert!(matches!(err, CnabError::Configuration(_)));
        assert!(err.to_string().contains("kubernetes"));
    }

    #[test]
    fn for_image_uses_image_type() {
        let registry = DriverRegistry::with_defaults();
        let image = InvocationImage::new("example.com/myorg/myinstaller");
        assert_eq!(registry.for_image(&image).unwrap().name(), "docker");

        let mut wasm = image.clone();
        wasm.image_type = "wasm".into();
        assert!(registry.for_image(&wasm).is_err());
    }
}
