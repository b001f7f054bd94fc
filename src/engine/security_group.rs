use std::sync::Arc;

use function_name::named;

use crate::call_log;
use crate::engine::{Engine, stamp, validate_name};
use crate::errors::EngineError;
use crate::iid::{Iid, encode_name, resolve};
use crate::resources::ResourceType;
use crate::resources::security_group::{SecurityGroupHandler, SecurityGroupInfo, SecurityGroupRequest, SecurityRule};

pub(crate) async fn resolve_security_group(
    handler: &Arc<dyn SecurityGroupHandler>,
    reference: &Iid,
) -> Result<Iid, EngineError> {
    if !reference.name_id.is_empty() && !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let candidates: Vec<Iid> = handler
        .list_security_group()
        .await?
        .into_iter()
        .map(|group| group.iid)
        .collect();
    resolve(ResourceType::SecurityGroup, reference, &candidates)
}

fn stamp_group(mut info: SecurityGroupInfo) -> SecurityGroupInfo {
    info.iid = stamp(&info.iid);
    info.vpc_iid = stamp(&info.vpc_iid);
    info
}

impl Engine {
    /// Security group creation is synchronous on every supported backend;
    /// no reconciliation loop is involved.
    #[named]
    pub async fn create_security_group(
        &self,
        connection_name: &str,
        request: SecurityGroupRequest,
    ) -> Result<SecurityGroupInfo, Box<EngineError>> {
        validate_name(&request.iid.name_id)?;
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.security_group_handler()?;
        let record = self.record(&bundle, ResourceType::SecurityGroup, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let requested_name = request.iid.name_id.clone();
            let existing = handler.list_security_group().await?;
            if existing.iter().any(|group| group.iid.display_name() == requested_name) {
                return Err(EngineError::AlreadyExists {
                    resource_type: ResourceType::SecurityGroup,
                    name: requested_name,
                });
            }
            let vpc_handler = bundle.connection.vpc_handler()?;
            let vpc_iid = super::vpc::resolve_vpc(&vpc_handler, &request.vpc_iid).await?;
            let request = SecurityGroupRequest {
                iid: Iid::from_name(&encode_name(&requested_name)),
                vpc_iid,
                ..request
            };
            let mut info = handler.create_security_group(request).await?;
            info.iid = Iid::new(&requested_name, &info.iid.system_id);
            info.vpc_iid = stamp(&info.vpc_iid);
            Ok(info)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn list_security_group(&self, connection_name: &str) -> Result<Vec<SecurityGroupInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.security_group_handler()?;
        let record = self.record(&bundle, ResourceType::SecurityGroup, "", function_name!());
        let started = call_log::start();
        let result = handler
            .list_security_group()
            .await
            .map_err(Box::new)
            .map(|groups| groups.into_iter().map(stamp_group).collect());
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_security_group(
        &self,
        connection_name: &str,
        group: &Iid,
    ) -> Result<SecurityGroupInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.security_group_handler()?;
        let record = self.record(&bundle, ResourceType::SecurityGroup, &group.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_security_group(&handler, group).await?;
            handler.get_security_group(&resolved).await.map(stamp_group)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn delete_security_group(&self, connection_name: &str, group: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.security_group_handler()?;
        let record = self.record(&bundle, ResourceType::SecurityGroup, &group.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_security_group(&handler, group).await?;
            handler.delete_security_group(&resolved).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Duplicate rules are rejected before the backend sees them.
    #[named]
    pub async fn add_security_rules(
        &self,
        connection_name: &str,
        group: &Iid,
        rules: &[SecurityRule],
    ) -> Result<SecurityGroupInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.security_group_handler()?;
        let record = self.record(&bundle, ResourceType::SecurityGroup, &group.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            if rules.is_empty() {
                return Err(EngineError::new_validation("no rules to add".to_string()));
            }
            let resolved = resolve_security_group(&handler, group).await?;
            let current = handler.get_security_group(&resolved).await?;
            for rule in rules {
                if current.rules.contains(rule) {
                    return Err(EngineError::new_validation(format!(
                        "rule {}/{}:{} already exists on {}",
                        rule.protocol, rule.from_port, rule.to_port, group.name_id
                    )));
                }
            }
            handler.add_rules(&resolved, rules).await.map(stamp_group)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn remove_security_rules(
        &self,
        connection_name: &str,
        group: &Iid,
        rules: &[SecurityRule],
    ) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.security_group_handler()?;
        let record = self.record(&bundle, ResourceType::SecurityGroup, &group.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            if rules.is_empty() {
                return Err(EngineError::new_validation("no rules to remove".to_string()));
            }
            let resolved = resolve_security_group(&handler, group).await?;
            handler.remove_rules(&resolved, rules).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}
