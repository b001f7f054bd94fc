use std::sync::{Arc, OnceLock};
use std::time::Duration;

use function_name::named;
use tokio::time::Instant;
use tracing::warn;

use crate::call_log;
use crate::cloud_provider::Kind;
use crate::engine::{Engine, stamp, validate_name};
use crate::errors::{EngineError, ProviderError};
use crate::iid::{Iid, encode_name, resolve};
use crate::reconciler::Waiter;
use crate::resources::ResourceType;
use crate::resources::nlb::{HealthChecker, HealthInfo, Listener, NlbHandler, NlbInfo, NlbRequest, NlbStatus};
use crate::transaction::{Transaction, Unwinder, wrap_rollback_failures};

pub(crate) async fn resolve_nlb(handler: &Arc<dyn NlbHandler>, reference: &Iid) -> Result<Iid, EngineError> {
    if !reference.name_id.is_empty() && !reference.system_id.is_empty() {
        return Ok(reference.clone());
    }
    let candidates: Vec<Iid> = handler.list_nlb().await?.into_iter().map(|nlb| nlb.iid).collect();
    resolve(ResourceType::Nlb, reference, &candidates)
}

/// Fills engine defaults for health checking: TCP interval 10 / timeout 10 /
/// threshold 3, HTTP timeout 6. AWS and Azure manage the timeout themselves
/// and reject an explicit one, so it stays unset there.
fn fill_default_health_checker(provider: Kind, listener_protocol: &str, checker: &mut HealthChecker) {
    if checker.protocol.is_empty() {
        checker.protocol = if listener_protocol.is_empty() {
            "TCP".to_string()
        } else {
            listener_protocol.to_string()
        };
    }
    if checker.interval == -1 {
        checker.interval = 10;
    }
    if checker.timeout == -1 && !matches!(provider, Kind::Aws | Kind::Azure) {
        checker.timeout = if checker.protocol == "HTTP" { 6 } else { 10 };
    }
    if checker.threshold == -1 {
        checker.threshold = 3;
    }
}

/// Registers the full composite teardown in creation order, so unwinding
/// runs public IP -> members -> health monitor -> pool -> listener -> shell.
/// Both rollback after a failed creation and explicit deletion use this.
fn register_teardown(unwinder: &mut Unwinder<'_>, handler: &Arc<dyn NlbHandler>, nlb_iid: &Iid, members: &[Iid]) {
    {
        let handler = Arc::clone(handler);
        let iid = Iid::clone(nlb_iid);
        unwinder.register("load balancer", move || async move { handler.delete_load_balancer(&iid).await });
    }
    {
        let handler = Arc::clone(handler);
        let iid = Iid::clone(nlb_iid);
        unwinder.register("listener", move || async move { handler.delete_listener(&iid).await });
    }
    {
        let handler = Arc::clone(handler);
        let iid = Iid::clone(nlb_iid);
        unwinder.register("vm group", move || async move { handler.delete_vm_group(&iid).await });
    }
    {
        let handler = Arc::clone(handler);
        let iid = Iid::clone(nlb_iid);
        unwinder.register("health monitor", move || async move { handler.delete_health_monitor(&iid).await });
    }
    {
        let handler = Arc::clone(handler);
        let iid = Iid::clone(nlb_iid);
        let members = members.to_vec();
        unwinder.register("members", move || async move { handler.deregister_vms(&iid, &members).await });
    }
    {
        let handler = Arc::clone(handler);
        let iid = Iid::clone(nlb_iid);
        unwinder.register("public ip", move || async move { handler.release_public_ip(&iid).await });
    }
}

fn stamp_nlb(mut info: NlbInfo) -> NlbInfo {
    info.iid = stamp(&info.iid);
    info.vpc_iid = stamp(&info.vpc_iid);
    info.vm_group.vms = info.vm_group.vms.iter().map(stamp).collect();
    info
}

impl Engine {
    /// Assembles a network load balancer from its ordered sub-resources:
    /// shell, listener, VM group, health monitor, members, public IP. The
    /// first failing step rolls back everything already created, in reverse
    /// order, before the failure is surfaced.
    #[named]
    pub async fn create_nlb(
        &self,
        connection_name: &str,
        request: NlbRequest,
        deadline: Option<Duration>,
    ) -> Result<NlbInfo, Box<EngineError>> {
        validate_name(&request.iid.name_id)?;
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, &request.iid.name_id, function_name!());
        let started = call_log::start();
        let result = self.create_nlb_inner(bundle.provider, &bundle.connection, &handler, request, deadline).await;
        self.emit(record, started, &result);
        result
    }

    async fn create_nlb_inner(
        &self,
        provider: Kind,
        connection: &Arc<dyn crate::cloud_provider::CloudConnection>,
        handler: &Arc<dyn NlbHandler>,
        mut request: NlbRequest,
        deadline: Option<Duration>,
    ) -> Result<NlbInfo, Box<EngineError>> {
        let requested_name = request.iid.name_id.clone();
        let existing = handler.list_nlb().await.map_err(Box::new)?;
        if existing.iter().any(|nlb| nlb.iid.display_name() == requested_name) {
            return Err(Box::new(EngineError::AlreadyExists {
                resource_type: ResourceType::Nlb,
                name: requested_name,
            }));
        }

        // fail fast: every referenced resource must resolve before the
        // first sub-resource is created
        let vpc_handler = connection.vpc_handler()?;
        request.vpc_iid = super::vpc::resolve_vpc(&vpc_handler, &request.vpc_iid).await.map_err(Box::new)?;
        let vm_handler = connection.vm_handler()?;
        let mut members = Vec::with_capacity(request.vm_group.vms.len());
        for vm in &request.vm_group.vms {
            members.push(super::vm::resolve_vm(&vm_handler, vm).await.map_err(Box::new)?);
        }
        if members.is_empty() {
            return Err(Box::new(EngineError::new_validation(
                "an NLB needs at least one backend VM".to_string(),
            )));
        }
        fill_default_health_checker(provider, &request.listener.protocol, &mut request.health_checker);

        request.iid = Iid::from_name(&encode_name(&requested_name));
        request.vm_group.vms = members.clone();

        let overall_deadline = self.deadline(deadline).map(|d| Instant::now() + d);
        let nlb_slot: Arc<OnceLock<Iid>> = Arc::new(OnceLock::new());
        let shell_request = request.clone();

        let transaction = Transaction::new()
            .with_step(
                "load balancer",
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    move || async move {
                        let iid = handler.create_load_balancer(&shell_request).await?;
                        let _ = slot.set(iid);
                        Ok(())
                    }
                },
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    move || async move {
                        match slot.get() {
                            Some(iid) => handler.delete_load_balancer(iid).await,
                            None => Ok(()),
                        }
                    }
                },
            )
            .with_step(
                "listener",
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    let listener = request.listener.clone();
                    move || async move {
                        handler
                            .create_listener(&slot.get().cloned().unwrap_or_default(), &listener)
                            .await
                            .map(|_| ())
                    }
                },
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    move || async move { handler.delete_listener(&slot.get().cloned().unwrap_or_default()).await }
                },
            )
            .with_step(
                "vm group",
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    let vm_group = request.vm_group.clone();
                    move || async move {
                        handler
                            .create_vm_group(&slot.get().cloned().unwrap_or_default(), &vm_group)
                            .await
                            .map(|_| ())
                    }
                },
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    move || async move { handler.delete_vm_group(&slot.get().cloned().unwrap_or_default()).await }
                },
            )
            .with_step(
                "health monitor",
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    let checker = request.health_checker.clone();
                    move || async move {
                        handler
                            .create_health_monitor(&slot.get().cloned().unwrap_or_default(), &checker)
                            .await
                            .map(|_| ())
                    }
                },
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    move || async move { handler.delete_health_monitor(&slot.get().cloned().unwrap_or_default()).await }
                },
            )
            .with_step(
                "members",
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    let members = members.clone();
                    move || async move {
                        handler
                            .register_vms(&slot.get().cloned().unwrap_or_default(), &members)
                            .await
                    }
                },
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    let members = members.clone();
                    move || async move {
                        handler
                            .deregister_vms(&slot.get().cloned().unwrap_or_default(), &members)
                            .await
                    }
                },
            )
            .with_step(
                "public ip",
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    move || async move {
                        handler
                            .allocate_public_ip(&slot.get().cloned().unwrap_or_default())
                            .await
                            .map(|_| ())
                    }
                },
                {
                    let handler = handler.clone();
                    let slot = nlb_slot.clone();
                    move || async move { handler.release_public_ip(&slot.get().cloned().unwrap_or_default()).await }
                },
            );

        transaction.commit().await?;
        let driver_iid = nlb_slot.get().cloned().unwrap_or_default();

        // every sub-resource is in place; the composite is Active once the
        // backend agrees
        let waiter = Waiter::new(ResourceType::Nlb, &requested_name, self.config.budgets.nlb_create)
            .with_deadline_until(overall_deadline);
        let outcome = waiter
            .await_terminal(
                || {
                    let handler = Arc::clone(handler);
                    let iid = driver_iid.clone();
                    async move { handler.get_nlb_status(&iid).await }
                },
                NlbStatus::is_create_terminal,
            )
            .await;
        let settle_error = match outcome {
            Ok(NlbStatus::Active) => None,
            Ok(status) => Some(EngineError::new_provider(
                "CreateNLB",
                ResourceType::Nlb,
                &requested_name,
                ProviderError::new_from_safe_message(format!("NLB entered terminal status {status}")),
            )),
            Err(err) => Some(err),
        };
        if let Some(original) = settle_error {
            warn!("NLB `{requested_name}` never settled, tearing it down: {original}");
            let mut unwinder = Unwinder::new();
            register_teardown(&mut unwinder, handler, &driver_iid, &members);
            let failures = unwinder.unwind().await;
            return Err(Box::new(wrap_rollback_failures(original, failures)));
        }

        let mut info = handler.get_nlb(&driver_iid).await.map_err(Box::new)?;
        info.iid = Iid::new(&requested_name, &info.iid.system_id);
        info.vpc_iid = stamp(&info.vpc_iid);
        info.vm_group.vms = info.vm_group.vms.iter().map(stamp).collect();
        Ok(info)
    }

    #[named]
    pub async fn list_nlb(&self, connection_name: &str) -> Result<Vec<NlbInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, "", function_name!());
        let started = call_log::start();
        let result = handler
            .list_nlb()
            .await
            .map_err(Box::new)
            .map(|nlbs| nlbs.into_iter().map(stamp_nlb).collect());
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_nlb(&self, connection_name: &str, nlb: &Iid) -> Result<NlbInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, &nlb.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_nlb(&handler, nlb).await?;
            handler.get_nlb(&resolved).await.map(stamp_nlb)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_nlb_status(&self, connection_name: &str, nlb: &Iid) -> Result<NlbStatus, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, &nlb.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_nlb(&handler, nlb).await?;
            handler.get_nlb_status(&resolved).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    /// Tears the composite down in strict reverse creation order, the same
    /// path rollback takes.
    #[named]
    pub async fn delete_nlb(&self, connection_name: &str, nlb: &Iid) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, &nlb.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_nlb(&handler, nlb).await?;
            let info = handler.get_nlb(&resolved).await?;
            let mut unwinder = Unwinder::new();
            register_teardown(&mut unwinder, &handler, &resolved, &info.vm_group.vms);
            let failures = unwinder.unwind().await;
            match failures.into_iter().next() {
                Some((_, first)) => Err(first),
                None => Ok(()),
            }
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn add_nlb_vms(&self, connection_name: &str, nlb: &Iid, vms: &[Iid]) -> Result<NlbInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let vm_handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, &nlb.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_nlb(&handler, nlb).await?;
            let mut members = Vec::with_capacity(vms.len());
            for vm in vms {
                members.push(super::vm::resolve_vm(&vm_handler, vm).await?);
            }
            handler.register_vms(&resolved, &members).await?;
            handler.get_nlb(&resolved).await.map(stamp_nlb)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn remove_nlb_vms(&self, connection_name: &str, nlb: &Iid, vms: &[Iid]) -> Result<(), Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let vm_handler = bundle.connection.vm_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, &nlb.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_nlb(&handler, nlb).await?;
            let mut members = Vec::with_capacity(vms.len());
            for vm in vms {
                members.push(super::vm::resolve_vm(&vm_handler, vm).await?);
            }
            handler.deregister_vms(&resolved, &members).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_nlb_health(&self, connection_name: &str, nlb: &Iid) -> Result<HealthInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, &nlb.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_nlb(&handler, nlb).await?;
            let mut health = handler.get_vm_group_health(&resolved).await?;
            health.all_vms = health.all_vms.iter().map(stamp).collect();
            health.healthy_vms = health.healthy_vms.iter().map(stamp).collect();
            health.unhealthy_vms = health.unhealthy_vms.iter().map(stamp).collect();
            Ok(health)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn change_nlb_listener(
        &self,
        connection_name: &str,
        nlb: &Iid,
        listener: &Listener,
    ) -> Result<NlbInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, &nlb.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let resolved = resolve_nlb(&handler, nlb).await?;
            handler.change_listener(&resolved, listener).await.map(stamp_nlb)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn change_nlb_health_checker(
        &self,
        connection_name: &str,
        nlb: &Iid,
        checker: &HealthChecker,
    ) -> Result<NlbInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.nlb_handler()?;
        let record = self.record(&bundle, ResourceType::Nlb, &nlb.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            let mut checker = checker.clone();
            fill_default_health_checker(bundle.provider, "", &mut checker);
            let resolved = resolve_nlb(&handler, nlb).await?;
            handler.change_health_checker(&resolved, &checker).await.map(stamp_nlb)
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_default_health_checker_tcp() {
        let mut checker = HealthChecker::default();
        fill_default_health_checker(Kind::Mock, "TCP", &mut checker);
        assert_eq!(checker.interval, 10);
        assert_eq!(checker.timeout, 10);
        assert_eq!(checker.threshold, 3);
    }

    #[test]
    fn test_fill_default_health_checker_leaves_timeout_on_aws() {
        let mut checker = HealthChecker::default();
        fill_default_health_checker(Kind::Aws, "TCP", &mut checker);
        assert_eq!(checker.timeout, -1);
        assert_eq!(checker.interval, 10);
    }

    #[test]
    fn test_fill_default_health_checker_http_timeout() {
        let mut checker = HealthChecker {
            protocol: "HTTP".to_string(),
            ..HealthChecker::default()
        };
        fill_default_health_checker(Kind::Gcp, "TCP", &mut checker);
        assert_eq!(checker.timeout, 6);
    }

    #[test]
    fn test_explicit_health_checker_values_survive() {
        let mut checker = HealthChecker {
            protocol: "TCP".to_string(),
            port: "80".to_string(),
            interval: 5,
            timeout: 2,
            threshold: 7,
            key_values: vec![],
        };
        fill_default_health_checker(Kind::Mock, "TCP", &mut checker);
        assert_eq!((checker.interval, checker.timeout, checker.threshold), (5, 2, 7));
    }
}
