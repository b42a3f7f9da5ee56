use bollard::Docker;
use bollard::container::{Config, CreateContainerOptions, ListContainersOptions, StartContainerOptions};
use bollard::models::HostConfig;
use std::collections::HashMap;
use crate::config::ContainerConfig;
use crate::errors::MalsiftError;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    Running,
    Stopped,
    NotFound,
}

/// Long-lived scanning container that engines exec their tools in.
pub struct ContainerManager {
    docker: Docker,
    image: String,
    container_name: String,
    network_mode: String,
    capabilities: Vec<String>,
}

impl ContainerManager {
    pub fn new(config: &ContainerConfig) -> Result<Self, MalsiftError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| MalsiftError::Container(format!("Failed to connect to Docker: {}", e)))?;

        Ok(Self {
            docker,
            image: config.image.clone(),
            container_name: config.name.clone(),
            network_mode: config.network_mode.clone(),
            capabilities: config.capabilities.clone(),
        })
    }

    pub async fn status(&self) -> ContainerStatus {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![self.container_name.clone()]);

        let options = ListContainersOptions { all: true, filters, ..Default::default() };

        let wanted = format!("/{}", self.container_name);
        match self.docker.list_containers(Some(options)).await {
            Ok(containers) => containers
                .iter()
                .find(|c| c.names.as_ref().is_some_and(|names| names.iter().any(|n| n == &wanted)))
                .map(|c| match c.state.as_deref() {
                    Some("running") => ContainerStatus::Running,
                    _ => ContainerStatus::Stopped,
                })
                .unwrap_or(ContainerStatus::NotFound),
            Err(e) => {
                warn!(error = %e, "Could not list containers");
                ContainerStatus::NotFound
            }
        }
    }

    pub async fn ensure_running(&self) -> Result<(), MalsiftError> {
        match self.status().await {
            ContainerStatus::Running => {
                info!(container = %self.container_name, "Scanner container already running");
                Ok(())
            }
            ContainerStatus::Stopped => {
                info!(container = %self.container_name, "Starting existing scanner container");
                self.start().await
            }
            ContainerStatus::NotFound => {
                info!(container = %self.container_name, "Creating scanner container");
                self.ensure_image().await?;
                self.create_and_start().await
            }
        }
    }

    async fn start(&self) -> Result<(), MalsiftError> {
        self.docker
            .start_container(&self.container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| MalsiftError::Container(format!("Failed to start container: {}", e)))
    }

    async fn ensure_image(&self) -> Result<(), MalsiftError> {
        match self.docker.inspect_image(&self.image).await {
            Ok(_) => Ok(()),
            Err(_) => Err(MalsiftError::Container(format!(
                "Image '{}' not found. Build an image with nmap and masscan installed and tag it {}",
                self.image, self.image
            ))),
        }
    }

    async fn create_and_start(&self) -> Result<(), MalsiftError> {
        // Raw sockets need NET_RAW/NET_ADMIN and the host network.
        let host_config = HostConfig {
            network_mode: Some(self.network_mode.clone()),
            cap_add: Some(self.capabilities.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions { name: self.container_name.as_str(), platform: None };

        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| MalsiftError::Container(format!("Failed to create container: {}", e)))?;
        self.start().await?;

        info!(container = %self.container_name, image = %self.image, "Scanner container started");
        Ok(())
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }
}
