use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cloud_provider::mock::{MockBehavior, MockRegion};
use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::ResourceType;
use crate::resources::nlb::{
    HealthChecker, HealthInfo, Listener, NlbHandler, NlbInfo, NlbRequest, NlbStatus, VmGroup,
};
use crate::resources::security_group::{
    SecurityGroupHandler, SecurityGroupInfo, SecurityGroupRequest, SecurityRule,
};
use crate::resources::vm::VmStatus;
use crate::resources::vpc::{SubnetInfo, SubnetRequest, VpcHandler, VpcInfo, VpcRequest, VpcStatus};

use super::compute::assert_vm_exists;

pub struct MockVpc {
    pub info: VpcInfo,
    pub countdown: u32,
}

impl MockVpc {
    fn tick(&mut self) -> VpcStatus {
        if self.info.status == VpcStatus::Creating {
            if self.countdown == 0 {
                self.info.status = VpcStatus::Available;
            } else {
                self.countdown -= 1;
            }
        }
        self.info.status
    }
}

pub struct MockVpcHandler {
    region_state: Arc<MockRegion>,
    behavior: Arc<MockBehavior>,
}

impl MockVpcHandler {
    pub fn new(region_state: Arc<MockRegion>, behavior: Arc<MockBehavior>) -> Self {
        MockVpcHandler { region_state, behavior }
    }
}

fn vpc_not_found(iid: &Iid) -> EngineError {
    EngineError::new_not_found(ResourceType::Vpc, &iid.to_string())
}

fn find_vpc_id(
    vpcs: &std::collections::HashMap<String, MockVpc>,
    iid: &Iid,
) -> Option<String> {
    if !iid.system_id.is_empty() {
        return vpcs.contains_key(&iid.system_id).then(|| iid.system_id.clone());
    }
    vpcs.iter()
        .find(|(_, vpc)| vpc.info.iid.name_id == iid.name_id)
        .map(|(id, _)| id.clone())
}

#[async_trait]
impl VpcHandler for MockVpcHandler {
    async fn create_vpc(&self, request: VpcRequest) -> Result<VpcInfo, EngineError> {
        self.behavior
            .fail_if_armed("create_vpc", ResourceType::Vpc, &request.iid.name_id)?;
        let system_id = self.region_state.next_system_id("vpc");
        let info = VpcInfo {
            iid: Iid::new(&request.iid.name_id, &system_id),
            ipv4_cidr: request.ipv4_cidr.clone(),
            subnets: vec![],
            status: VpcStatus::Creating,
            tags: request.tags.clone(),
            key_values: vec![],
        };
        let mut vpcs = MockRegion::lock(&self.region_state.vpcs, ResourceType::Vpc)?;
        vpcs.insert(
            system_id,
            MockVpc {
                info: info.clone(),
                countdown: self.behavior.settle_after_polls,
            },
        );
        Ok(info)
    }

    async fn list_vpc(&self) -> Result<Vec<VpcInfo>, EngineError> {
        let mut vpcs = MockRegion::lock(&self.region_state.vpcs, ResourceType::Vpc)?;
        Ok(vpcs
            .values_mut()
            .map(|vpc| {
                vpc.tick();
                vpc.info.clone()
            })
            .collect())
    }

    async fn get_vpc(&self, iid: &Iid) -> Result<VpcInfo, EngineError> {
        let mut vpcs = MockRegion::lock(&self.region_state.vpcs, ResourceType::Vpc)?;
        let system_id = find_vpc_id(&vpcs, iid).ok_or_else(|| vpc_not_found(iid))?;
        let vpc = vpcs.get_mut(&system_id).ok_or_else(|| vpc_not_found(iid))?;
        vpc.tick();
        Ok(vpc.info.clone())
    }

    async fn get_vpc_status(&self, iid: &Iid) -> Result<VpcStatus, EngineError> {
        let mut vpcs = MockRegion::lock(&self.region_state.vpcs, ResourceType::Vpc)?;
        let system_id = find_vpc_id(&vpcs, iid).ok_or_else(|| vpc_not_found(iid))?;
        let vpc = vpcs.get_mut(&system_id).ok_or_else(|| vpc_not_found(iid))?;
        Ok(vpc.tick())
    }

    async fn delete_vpc(&self, iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("delete_vpc", ResourceType::Vpc, &iid.name_id)?;
        let mut vpcs = MockRegion::lock(&self.region_state.vpcs, ResourceType::Vpc)?;
        let system_id = find_vpc_id(&vpcs, iid).ok_or_else(|| vpc_not_found(iid))?;
        let vpc = vpcs.get(&system_id).ok_or_else(|| vpc_not_found(iid))?;
        if !vpc.info.subnets.is_empty() {
            return Err(EngineError::new_validation(format!(
                "VPC {} still has {} subnets",
                vpc.info.iid, vpc.info.subnets.len()
            )));
        }
        vpcs.remove(&system_id);
        Ok(())
    }

    async fn add_subnet(&self, vpc_iid: &Iid, subnet: SubnetRequest) -> Result<SubnetInfo, EngineError> {
        self.behavior
            .fail_if_armed("add_subnet", ResourceType::Subnet, &subnet.iid.name_id)?;
        let mut vpcs = MockRegion::lock(&self.region_state.vpcs, ResourceType::Vpc)?;
        let system_id = find_vpc_id(&vpcs, vpc_iid).ok_or_else(|| vpc_not_found(vpc_iid))?;
        let vpc = vpcs.get_mut(&system_id).ok_or_else(|| vpc_not_found(vpc_iid))?;
        let subnet_system_id = self.region_state.next_system_id("subnet");
        let info = SubnetInfo {
            iid: Iid::new(&subnet.iid.name_id, &subnet_system_id),
            zone: subnet.zone.clone(),
            ipv4_cidr: subnet.ipv4_cidr.clone(),
            tags: subnet.tags.clone(),
            key_values: vec![],
        };
        vpc.info.subnets.push(info.clone());
        Ok(info)
    }

    async fn remove_subnet(&self, vpc_iid: &Iid, subnet_iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("remove_subnet", ResourceType::Subnet, &subnet_iid.name_id)?;
        let mut vpcs = MockRegion::lock(&self.region_state.vpcs, ResourceType::Vpc)?;
        let system_id = find_vpc_id(&vpcs, vpc_iid).ok_or_else(|| vpc_not_found(vpc_iid))?;
        let vpc = vpcs.get_mut(&system_id).ok_or_else(|| vpc_not_found(vpc_iid))?;
        let before = vpc.info.subnets.len();
        vpc.info.subnets.retain(|subnet| {
            !(subnet.iid.system_id == subnet_iid.system_id
                || (!subnet_iid.name_id.is_empty() && subnet.iid.name_id == subnet_iid.name_id))
        });
        if vpc.info.subnets.len() == before {
            return Err(EngineError::new_not_found(ResourceType::Subnet, &subnet_iid.to_string()));
        }
        Ok(())
    }
}

//================ SecurityGroup

pub struct MockSecurityGroupHandler {
    region_state: Arc<MockRegion>,
    behavior: Arc<MockBehavior>,
}

impl MockSecurityGroupHandler {
    pub fn new(region_state: Arc<MockRegion>, behavior: Arc<MockBehavior>) -> Self {
        MockSecurityGroupHandler { region_state, behavior }
    }
}

fn find_sg_id(
    groups: &std::collections::HashMap<String, SecurityGroupInfo>,
    iid: &Iid,
) -> Option<String> {
    if !iid.system_id.is_empty() {
        return groups.contains_key(&iid.system_id).then(|| iid.system_id.clone());
    }
    groups
        .iter()
        .find(|(_, info)| info.iid.name_id == iid.name_id)
        .map(|(id, _)| id.clone())
}

#[async_trait]
impl SecurityGroupHandler for MockSecurityGroupHandler {
    async fn create_security_group(&self, request: SecurityGroupRequest) -> Result<SecurityGroupInfo, EngineError> {
        self.behavior
            .fail_if_armed("create_security_group", ResourceType::SecurityGroup, &request.iid.name_id)?;
        let system_id = self.region_state.next_system_id("sg");
        let info = SecurityGroupInfo {
            iid: Iid::new(&request.iid.name_id, &system_id),
            vpc_iid: request.vpc_iid.clone(),
            rules: request.rules.clone(),
            tags: request.tags.clone(),
            key_values: vec![],
        };
        let mut groups = MockRegion::lock(&self.region_state.security_groups, ResourceType::SecurityGroup)?;
        groups.insert(system_id, info.clone());
        Ok(info)
    }

    async fn list_security_group(&self) -> Result<Vec<SecurityGroupInfo>, EngineError> {
        let groups = MockRegion::lock(&self.region_state.security_groups, ResourceType::SecurityGroup)?;
        Ok(groups.values().cloned().collect())
    }

    async fn get_security_group(&self, iid: &Iid) -> Result<SecurityGroupInfo, EngineError> {
        let groups = MockRegion::lock(&self.region_state.security_groups, ResourceType::SecurityGroup)?;
        let system_id =
            find_sg_id(&groups, iid).ok_or_else(|| EngineError::new_not_found(ResourceType::SecurityGroup, &iid.to_string()))?;
        Ok(groups[&system_id].clone())
    }

    async fn delete_security_group(&self, iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("delete_security_group", ResourceType::SecurityGroup, &iid.name_id)?;
        let mut groups = MockRegion::lock(&self.region_state.security_groups, ResourceType::SecurityGroup)?;
        let system_id =
            find_sg_id(&groups, iid).ok_or_else(|| EngineError::new_not_found(ResourceType::SecurityGroup, &iid.to_string()))?;
        groups.remove(&system_id);
        Ok(())
    }

    async fn add_rules(&self, iid: &Iid, rules: &[SecurityRule]) -> Result<SecurityGroupInfo, EngineError> {
        let mut groups = MockRegion::lock(&self.region_state.security_groups, ResourceType::SecurityGroup)?;
        let system_id =
            find_sg_id(&groups, iid).ok_or_else(|| EngineError::new_not_found(ResourceType::SecurityGroup, &iid.to_string()))?;
        let info = groups
            .get_mut(&system_id)
            .ok_or_else(|| EngineError::new_not_found(ResourceType::SecurityGroup, &iid.to_string()))?;
        for rule in rules {
            if info.rules.contains(rule) {
                return Err(EngineError::new_validation(format!(
                    "rule {}/{}:{} already exists on {}",
                    rule.protocol, rule.from_port, rule.to_port, info.iid
                )));
            }
            info.rules.push(rule.clone());
        }
        Ok(info.clone())
    }

    async fn remove_rules(&self, iid: &Iid, rules: &[SecurityRule]) -> Result<(), EngineError> {
        let mut groups = MockRegion::lock(&self.region_state.security_groups, ResourceType::SecurityGroup)?;
        let system_id =
            find_sg_id(&groups, iid).ok_or_else(|| EngineError::new_not_found(ResourceType::SecurityGroup, &iid.to_string()))?;
        let info = groups
            .get_mut(&system_id)
            .ok_or_else(|| EngineError::new_not_found(ResourceType::SecurityGroup, &iid.to_string()))?;
        for rule in rules {
            let before = info.rules.len();
            info.rules.retain(|existing| existing != rule);
            if info.rules.len() == before {
                return Err(EngineError::new_validation(format!(
                    "rule {}/{}:{} does not exist on {}",
                    rule.protocol, rule.from_port, rule.to_port, info.iid
                )));
            }
        }
        Ok(())
    }
}

//================ NLB

/// Composite load balancer: the shell plus the presence of every
/// sub-resource, in the exact dependency order the engine creates them.
pub struct MockNlb {
    pub request: NlbRequest,
    pub system_id: String,
    pub created_at: DateTime<Utc>,
    pub listener_id: Option<String>,
    pub vm_group_id: Option<String>,
    pub health_monitor_id: Option<String>,
    pub members: Vec<Iid>,
    pub public_ip: Option<String>,
    pub countdown: u32,
}

impl MockNlb {
    fn assembled(&self) -> bool {
        self.listener_id.is_some()
            && self.vm_group_id.is_some()
            && self.health_monitor_id.is_some()
            && !self.members.is_empty()
            && self.public_ip.is_some()
    }

    fn status(&mut self) -> NlbStatus {
        if self.countdown > 0 {
            self.countdown -= 1;
            return NlbStatus::Creating;
        }
        if self.assembled() {
            NlbStatus::Active
        } else {
            NlbStatus::Creating
        }
    }

    fn to_info(&mut self) -> NlbInfo {
        let status = self.status();
        let mut listener = self.request.listener.clone();
        if let Some(ip) = &self.public_ip {
            listener.ip = ip.clone();
            listener.dns_name = format!("{}.nlb.mock.example", self.request.iid.name_id);
        }
        NlbInfo {
            iid: Iid::new(&self.request.iid.name_id, &self.system_id),
            vpc_iid: self.request.vpc_iid.clone(),
            nlb_type: self.request.nlb_type,
            scope: self.request.scope,
            listener,
            vm_group: VmGroup {
                vms: self.members.clone(),
                ..self.request.vm_group.clone()
            },
            health_checker: self.request.health_checker.clone(),
            status,
            created_at: self.created_at,
            tags: self.request.tags.clone(),
            key_values: vec![],
        }
    }
}

pub struct MockNlbHandler {
    region_state: Arc<MockRegion>,
    behavior: Arc<MockBehavior>,
}

impl MockNlbHandler {
    pub fn new(region_state: Arc<MockRegion>, behavior: Arc<MockBehavior>) -> Self {
        MockNlbHandler { region_state, behavior }
    }

    fn with_nlb<T>(
        &self,
        iid: &Iid,
        apply: impl FnOnce(&mut MockNlb) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut nlbs = MockRegion::lock(&self.region_state.nlbs, ResourceType::Nlb)?;
        let system_id = if !iid.system_id.is_empty() {
            iid.system_id.clone()
        } else {
            nlbs.iter()
                .find(|(_, nlb)| nlb.request.iid.name_id == iid.name_id)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Nlb, &iid.to_string()))?
        };
        let nlb = nlbs
            .get_mut(&system_id)
            .ok_or_else(|| EngineError::new_not_found(ResourceType::Nlb, &iid.to_string()))?;
        apply(nlb)
    }
}

#[async_trait]
impl NlbHandler for MockNlbHandler {
    async fn create_load_balancer(&self, request: &NlbRequest) -> Result<Iid, EngineError> {
        self.behavior
            .fail_if_armed("create_load_balancer", ResourceType::Nlb, &request.iid.name_id)?;
        {
            let vpcs = MockRegion::lock(&self.region_state.vpcs, ResourceType::Vpc)?;
            find_vpc_id(&vpcs, &request.vpc_iid).ok_or_else(|| vpc_not_found(&request.vpc_iid))?;
        }
        let system_id = self.region_state.next_system_id("nlb");
        let mut nlbs = MockRegion::lock(&self.region_state.nlbs, ResourceType::Nlb)?;
        nlbs.insert(
            system_id.clone(),
            MockNlb {
                request: request.clone(),
                system_id: system_id.clone(),
                created_at: Utc::now(),
                listener_id: None,
                vm_group_id: None,
                health_monitor_id: None,
                members: vec![],
                public_ip: None,
                countdown: self.behavior.settle_after_polls,
            },
        );
        Ok(Iid::new(&request.iid.name_id, &system_id))
    }

    async fn create_listener(&self, nlb_iid: &Iid, listener: &Listener) -> Result<Iid, EngineError> {
        self.behavior
            .fail_if_armed("create_listener", ResourceType::Nlb, &nlb_iid.name_id)?;
        let listener_id = self.region_state.next_system_id("lsn");
        let protocol = listener.protocol.clone();
        self.with_nlb(nlb_iid, |nlb| {
            if protocol != "TCP" && protocol != "UDP" {
                return Err(EngineError::new_validation(format!(
                    "listener protocol {protocol} is not supported"
                )));
            }
            nlb.listener_id = Some(listener_id.clone());
            Ok(Iid::new(&nlb.request.iid.name_id, &listener_id))
        })
    }

    async fn create_vm_group(&self, nlb_iid: &Iid, vm_group: &VmGroup) -> Result<Iid, EngineError> {
        self.behavior
            .fail_if_armed("create_vm_group", ResourceType::Nlb, &nlb_iid.name_id)?;
        let vm_group_id = self.region_state.next_system_id("pool");
        let vm_group = vm_group.clone();
        self.with_nlb(nlb_iid, |nlb| {
            if vm_group.port.is_empty() {
                return Err(EngineError::new_validation("vm group port must be set".to_string()));
            }
            nlb.request.vm_group = vm_group;
            nlb.vm_group_id = Some(vm_group_id.clone());
            Ok(Iid::new(&nlb.request.iid.name_id, &vm_group_id))
        })
    }

    async fn create_health_monitor(&self, nlb_iid: &Iid, checker: &HealthChecker) -> Result<Iid, EngineError> {
        self.behavior
            .fail_if_armed("create_health_monitor", ResourceType::Nlb, &nlb_iid.name_id)?;
        let monitor_id = self.region_state.next_system_id("hmon");
        let checker = checker.clone();
        self.with_nlb(nlb_iid, |nlb| {
            if checker.interval < 1 || checker.timeout < 1 || checker.threshold < 1 {
                return Err(EngineError::new_validation(
                    "health checker interval/timeout/threshold must be set".to_string(),
                ));
            }
            nlb.request.health_checker = checker;
            nlb.health_monitor_id = Some(monitor_id.clone());
            Ok(Iid::new(&nlb.request.iid.name_id, &monitor_id))
        })
    }

    async fn register_vms(&self, nlb_iid: &Iid, vms: &[Iid]) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("register_vms", ResourceType::Nlb, &nlb_iid.name_id)?;
        {
            let tables = MockRegion::lock(&self.region_state.vms, ResourceType::Vm)?;
            for vm in vms {
                assert_vm_exists(&tables, vm)?;
            }
        }
        let vms = vms.to_vec();
        self.with_nlb(nlb_iid, |nlb| {
            nlb.members.extend(vms);
            Ok(())
        })
    }

    async fn allocate_public_ip(&self, nlb_iid: &Iid) -> Result<String, EngineError> {
        self.behavior
            .fail_if_armed("allocate_public_ip", ResourceType::Nlb, &nlb_iid.name_id)?;
        let tail = self.region_state.next_system_id("eip");
        let host = tail[tail.len() - 2..].parse::<u8>().unwrap_or(9) % 250;
        self.with_nlb(nlb_iid, |nlb| {
            let ip = format!("203.0.113.{}", 1 + host);
            nlb.public_ip = Some(ip.clone());
            Ok(ip)
        })
    }

    async fn release_public_ip(&self, nlb_iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("release_public_ip", ResourceType::Nlb, &nlb_iid.name_id)?;
        self.with_nlb(nlb_iid, |nlb| {
            nlb.public_ip
                .take()
                .map(|_| ())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Nlb, "public ip"))
        })
    }

    async fn deregister_vms(&self, nlb_iid: &Iid, vms: &[Iid]) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("deregister_vms", ResourceType::Nlb, &nlb_iid.name_id)?;
        let vms = vms.to_vec();
        self.with_nlb(nlb_iid, |nlb| {
            nlb.members
                .retain(|member| !vms.iter().any(|vm| vm.system_id == member.system_id || vm.name_id == member.name_id));
            Ok(())
        })
    }

    async fn delete_health_monitor(&self, nlb_iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("delete_health_monitor", ResourceType::Nlb, &nlb_iid.name_id)?;
        self.with_nlb(nlb_iid, |nlb| {
            nlb.health_monitor_id
                .take()
                .map(|_| ())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Nlb, "health monitor"))
        })
    }

    async fn delete_vm_group(&self, nlb_iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("delete_vm_group", ResourceType::Nlb, &nlb_iid.name_id)?;
        self.with_nlb(nlb_iid, |nlb| {
            nlb.vm_group_id
                .take()
                .map(|_| ())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Nlb, "vm group"))
        })
    }

    async fn delete_listener(&self, nlb_iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("delete_listener", ResourceType::Nlb, &nlb_iid.name_id)?;
        self.with_nlb(nlb_iid, |nlb| {
            nlb.listener_id
                .take()
                .map(|_| ())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Nlb, "listener"))
        })
    }

    async fn delete_load_balancer(&self, nlb_iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("delete_load_balancer", ResourceType::Nlb, &nlb_iid.name_id)?;
        let mut nlbs = MockRegion::lock(&self.region_state.nlbs, ResourceType::Nlb)?;
        let system_id = if !nlb_iid.system_id.is_empty() {
            nlb_iid.system_id.clone()
        } else {
            nlbs.iter()
                .find(|(_, nlb)| nlb.request.iid.name_id == nlb_iid.name_id)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Nlb, &nlb_iid.to_string()))?
        };
        let nlb = nlbs
            .get(&system_id)
            .ok_or_else(|| EngineError::new_not_found(ResourceType::Nlb, &nlb_iid.to_string()))?;
        // backends refuse to drop a shell that still owns sub-resources,
        // which is what forces the strict reverse teardown order
        if nlb.listener_id.is_some() || nlb.vm_group_id.is_some() || nlb.health_monitor_id.is_some() || nlb.public_ip.is_some()
        {
            return Err(EngineError::new_validation(format!(
                "load balancer {} still owns sub-resources",
                nlb_iid
            )));
        }
        nlbs.remove(&system_id);
        Ok(())
    }

    async fn list_nlb(&self) -> Result<Vec<NlbInfo>, EngineError> {
        let mut nlbs = MockRegion::lock(&self.region_state.nlbs, ResourceType::Nlb)?;
        Ok(nlbs.values_mut().map(|nlb| nlb.to_info()).collect())
    }

    async fn get_nlb(&self, iid: &Iid) -> Result<NlbInfo, EngineError> {
        self.with_nlb(iid, |nlb| Ok(nlb.to_info()))
    }

    async fn get_nlb_status(&self, iid: &Iid) -> Result<NlbStatus, EngineError> {
        self.with_nlb(iid, |nlb| Ok(nlb.status()))
    }

    async fn get_vm_group_health(&self, iid: &Iid) -> Result<HealthInfo, EngineError> {
        let members = self.with_nlb(iid, |nlb| Ok(nlb.members.clone()))?;
        let vms = MockRegion::lock(&self.region_state.vms, ResourceType::Vm)?;
        let mut health = HealthInfo {
            all_vms: members.clone(),
            healthy_vms: vec![],
            unhealthy_vms: vec![],
        };
        for member in members {
            let running = vms
                .values()
                .find(|vm| vm.info.iid.system_id == member.system_id || vm.info.iid.name_id == member.name_id)
                .map(|vm| vm.status == VmStatus::Running)
                .unwrap_or(false);
            if running {
                health.healthy_vms.push(member);
            } else {
                health.unhealthy_vms.push(member);
            }
        }
        Ok(health)
    }

    async fn change_listener(&self, iid: &Iid, listener: &Listener) -> Result<NlbInfo, EngineError> {
        self.behavior
            .fail_if_armed("change_listener", ResourceType::Nlb, &iid.name_id)?;
        let listener = listener.clone();
        self.with_nlb(iid, move |nlb| {
            if nlb.listener_id.is_none() {
                return Err(EngineError::new_not_found(ResourceType::Nlb, "listener"));
            }
            nlb.request.listener = listener;
            Ok(nlb.to_info())
        })
    }

    async fn change_health_checker(&self, iid: &Iid, checker: &HealthChecker) -> Result<NlbInfo, EngineError> {
        self.behavior
            .fail_if_armed("change_health_checker", ResourceType::Nlb, &iid.name_id)?;
        let checker = checker.clone();
        self.with_nlb(iid, move |nlb| {
            if nlb.health_monitor_id.is_none() {
                return Err(EngineError::new_not_found(ResourceType::Nlb, "health monitor"));
            }
            nlb.request.health_checker = checker;
            Ok(nlb.to_info())
        })
    }
}
