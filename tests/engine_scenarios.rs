use std::sync::Arc;
use std::time::Duration;

use stratus_engine::call_log::{CallLogger, CallRecord, FileCallLogger};
use stratus_engine::cloud_provider::mock::{FAIL_POINTS_KEY, MockDriver, SETTLE_AFTER_POLLS_KEY};
use stratus_engine::cloud_provider::{Kind, ProviderCredential};
use stratus_engine::connection::{ConnectionConfig, ConnectionManager, DriverRegistry, StaticCatalog};
use stratus_engine::engine::{Engine, EngineConfig, PollBudgets, VmAction};
use stratus_engine::errors::EngineError;
use stratus_engine::iid::Iid;
use stratus_engine::logger::RotatingFileWriter;
use stratus_engine::reconciler::PollBudget;
use stratus_engine::resources::KeyValue;
use stratus_engine::resources::RegionInfo;
use stratus_engine::resources::disk::DiskRequest;
use stratus_engine::resources::key_pair::KeyPairRequest;
use stratus_engine::resources::my_image::MyImageRequest;
use stratus_engine::resources::nlb::{HealthChecker, Listener, NlbRequest, NlbStatus, VmGroup};
use stratus_engine::resources::cluster::{ClusterNetwork, ClusterRequest, NodeGroupRequest};
use stratus_engine::resources::file_system::FileSystemRequest;
use stratus_engine::resources::vm::{VmRequest, VmStatus};
use stratus_engine::resources::vpc::{SubnetRequest, VpcRequest};

const REGION: &str = "mock-region-1";

fn zero_interval_budgets() -> PollBudgets {
    PollBudgets {
        vm_boot: PollBudget::new(Duration::ZERO, 500),
        vm_terminate: PollBudget::new(Duration::ZERO, 120),
        disk_create: PollBudget::new(Duration::ZERO, 500),
        vpc_create: PollBudget::new(Duration::ZERO, 500),
        nlb_create: PollBudget::new(Duration::ZERO, 240),
        cluster_create: PollBudget::new(Duration::ZERO, 240),
        node_group: PollBudget::new(Duration::ZERO, 240),
        my_image: PollBudget::new(Duration::ZERO, 240),
        file_system: PollBudget::new(Duration::ZERO, 240),
    }
}

fn connection_config(extra: Vec<KeyValue>) -> ConnectionConfig {
    ConnectionConfig {
        provider: Kind::Mock,
        credential: ProviderCredential {
            identity: "mock-user".to_string(),
            secret: "mock-secret".to_string(),
            extra,
        },
        region: RegionInfo::new(REGION, "zone-a"),
    }
}

/// One shared mock driver behind several connection names, the way one real
/// backend region is reachable through several credential bindings.
fn test_engine() -> (Engine, Arc<MockDriver>) {
    let driver = Arc::new(MockDriver::new());
    let catalog = StaticCatalog::new()
        .with_connection("mock-main", connection_config(vec![]))
        .with_connection(
            "mock-slow",
            connection_config(vec![KeyValue::new(SETTLE_AFTER_POLLS_KEY, "2")]),
        )
        .with_connection(
            "mock-broken-hm",
            connection_config(vec![KeyValue::new(FAIL_POINTS_KEY, "create_health_monitor")]),
        )
        .with_connection(
            "mock-broken-ng",
            connection_config(vec![KeyValue::new(FAIL_POINTS_KEY, "add_node_group")]),
        )
        .with_connection(
            "mock-broken-fs",
            connection_config(vec![KeyValue::new(FAIL_POINTS_KEY, "add_access_subnet")]),
        );
    let manager = ConnectionManager::new(DriverRegistry::new().register(driver.clone()), Arc::new(catalog));
    let engine = Engine::new(
        manager,
        EngineConfig {
            budgets: zero_interval_budgets(),
            default_deadline: None,
        },
        Box::new(stratus_engine::call_log::StdCallLogger::new()),
    );
    (engine, driver)
}

async fn network_fixture(engine: &Engine) -> (Iid, Iid) {
    let vpc = engine
        .create_vpc(
            "mock-main",
            VpcRequest {
                iid: Iid::from_name("vpc-01"),
                ipv4_cidr: "10.0.0.0/16".to_string(),
                subnets: vec![SubnetRequest {
                    iid: Iid::from_name("subnet-01"),
                    zone: "zone-a".to_string(),
                    ipv4_cidr: "10.0.1.0/24".to_string(),
                    tags: vec![],
                }],
                tags: vec![],
            },
            None,
        )
        .await
        .expect("cannot create fixture VPC");
    let subnet = vpc.subnets[0].iid.clone();
    (vpc.iid, subnet)
}

fn vm_request(name: &str, vpc: &Iid, subnet: &Iid) -> VmRequest {
    VmRequest {
        iid: Iid::from_name(name),
        image_iid: Iid::new("ubuntu-22.04", "ubuntu-22.04"),
        vpc_iid: vpc.clone(),
        subnet_iid: subnet.clone(),
        vm_spec_name: "mock.small".to_string(),
        ..VmRequest::default()
    }
}

async fn vm_fixture(engine: &Engine, name: &str, vpc: &Iid, subnet: &Iid) -> Iid {
    engine
        .start_vm("mock-main", vm_request(name, vpc, subnet), None)
        .await
        .expect("cannot start fixture VM")
        .iid
}

fn nlb_request(name: &str, vpc: &Iid, vms: Vec<Iid>) -> NlbRequest {
    NlbRequest {
        iid: Iid::from_name(name),
        vpc_iid: vpc.clone(),
        listener: Listener {
            protocol: "TCP".to_string(),
            port: "80".to_string(),
            ..Listener::default()
        },
        vm_group: VmGroup {
            protocol: "TCP".to_string(),
            port: "8080".to_string(),
            vms,
            key_values: vec![],
        },
        health_checker: HealthChecker::default(),
        ..NlbRequest::default()
    }
}

#[tokio::test]
async fn test_vm_boot_reports_running_with_public_ip() {
    let (engine, _) = test_engine();
    let (vpc, subnet) = network_fixture(&engine).await;

    let info = engine
        .start_vm("mock-main", vm_request("vm-01", &vpc, &subnet), None)
        .await
        .unwrap();

    assert_eq!(info.iid.name_id, "vm-01");
    assert!(!info.iid.system_id.is_empty());
    assert!(!info.public_ip.is_empty());
    assert!(info.access_point.ends_with(":22"));

    // addressable by caller name afterwards
    let fetched = engine.get_vm("mock-main", &Iid::from_name("vm-01")).await.unwrap();
    assert_eq!(fetched.iid, info.iid);
    assert_eq!(
        engine.get_vm_status("mock-main", &Iid::from_name("vm-01")).await.unwrap(),
        VmStatus::Running
    );
}

#[tokio::test]
async fn test_vm_status_lifecycle_creating_running_terminating_absent() {
    let (engine, driver) = test_engine();
    let (vpc, subnet) = network_fixture(&engine).await;

    // create through the raw adapter so the engine's own boot wait does not
    // consume the transient states we want to observe
    use stratus_engine::cloud_provider::CloudDriver;
    let connection = driver
        .connect(
            &ProviderCredential {
                identity: "mock-user".to_string(),
                secret: "mock-secret".to_string(),
                extra: vec![KeyValue::new(SETTLE_AFTER_POLLS_KEY, "2")],
            },
            &RegionInfo::new(REGION, "zone-a"),
        )
        .unwrap();
    let handler = connection.vm_handler().unwrap();
    handler.start_vm(vm_request("vm-mid", &vpc, &subnet)).await.unwrap();

    // mid-creation the normalized status is Creating
    let status = engine.get_vm_status("mock-main", &Iid::from_name("vm-mid")).await.unwrap();
    assert_eq!(status, VmStatus::Creating);

    // a few polls later the backend reports active -> Running
    let mut status = VmStatus::Creating;
    for _ in 0..5 {
        status = engine.get_vm_status("mock-main", &Iid::from_name("vm-mid")).await.unwrap();
        if status == VmStatus::Running {
            break;
        }
    }
    assert_eq!(status, VmStatus::Running);

    // termination drains through Terminating into absence
    let final_status = engine
        .terminate_vm("mock-main", &Iid::from_name("vm-mid"), None)
        .await
        .unwrap();
    assert!(matches!(final_status, VmStatus::Terminated | VmStatus::NotExist));
    assert!(matches!(
        engine.get_vm_status("mock-main", &Iid::from_name("vm-mid")).await,
        Err(err) if matches!(*err, EngineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_vm_control_transitions() {
    let (engine, _) = test_engine();
    let (vpc, subnet) = network_fixture(&engine).await;
    let vm = vm_fixture(&engine, "vm-ctl", &vpc, &subnet).await;

    // resume of a running VM is rejected up front
    assert!(matches!(
        engine.control_vm("mock-main", &vm, VmAction::Resume).await,
        Err(err) if matches!(*err, EngineError::Validation { .. })
    ));

    assert_eq!(
        engine.control_vm("mock-main", &vm, VmAction::Suspend).await.unwrap(),
        VmStatus::Suspending
    );
    // settle=0: next status read lands on Suspended
    assert_eq!(
        engine.get_vm_status("mock-main", &vm).await.unwrap(),
        VmStatus::Suspended
    );
    engine.control_vm("mock-main", &vm, VmAction::Resume).await.unwrap();
    assert_eq!(engine.get_vm_status("mock-main", &vm).await.unwrap(), VmStatus::Running);
}

#[tokio::test]
async fn test_nlb_health_monitor_failure_leaves_zero_sub_resources() {
    let (engine, _) = test_engine();
    let (vpc, subnet) = network_fixture(&engine).await;
    let vm_a = vm_fixture(&engine, "vm-a", &vpc, &subnet).await;
    let vm_b = vm_fixture(&engine, "vm-b", &vpc, &subnet).await;

    // health-monitor creation fails after shell+listener+pool exist
    let err = engine
        .create_nlb(
            "mock-broken-hm",
            nlb_request("nlb-01", &vpc, vec![vm_a, vm_b]),
            None,
        )
        .await
        .unwrap_err();

    // the surfaced error is the failing step's, not a rollback error
    match *err {
        EngineError::Provider { ref operation, .. } => assert_eq!(operation, "create_health_monitor"),
        ref other => panic!("expected the health-monitor failure, got {other:?}"),
    }

    // nothing stayed behind: no load balancer, listener or pool anywhere
    let leftovers = engine.list_nlb("mock-main").await.unwrap();
    assert!(leftovers.is_empty(), "rollback left sub-resources: {leftovers:?}");
}

#[tokio::test]
async fn test_nlb_create_then_delete_round_trip() {
    let (engine, _) = test_engine();
    let (vpc, subnet) = network_fixture(&engine).await;
    let vm_a = vm_fixture(&engine, "vm-a", &vpc, &subnet).await;
    let vm_b = vm_fixture(&engine, "vm-b", &vpc, &subnet).await;

    let info = engine
        .create_nlb("mock-main", nlb_request("nlb-01", &vpc, vec![vm_a, vm_b]), None)
        .await
        .unwrap();

    assert_eq!(info.iid.name_id, "nlb-01");
    assert_eq!(info.status, NlbStatus::Active);
    assert!(!info.listener.ip.is_empty());
    assert_eq!(info.vm_group.vms.len(), 2);
    // engine defaults were applied to the health checker
    assert_eq!(info.health_checker.interval, 10);
    assert_eq!(info.health_checker.threshold, 3);

    let health = engine.get_nlb_health("mock-main", &Iid::from_name("nlb-01")).await.unwrap();
    assert_eq!(health.all_vms.len(), 2);
    assert_eq!(health.healthy_vms.len(), 2);
    assert!(health.unhealthy_vms.is_empty());

    // reverse-order teardown satisfies the backend's ordering constraints
    engine.delete_nlb("mock-main", &Iid::from_name("nlb-01")).await.unwrap();
    assert!(engine.list_nlb("mock-main").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_resource_name_is_rejected() {
    let (engine, _) = test_engine();

    let request = DiskRequest {
        iid: Iid::from_name("disk-01"),
        disk_size_gb: 100,
        ..DiskRequest::default()
    };
    engine.create_disk("mock-main", request.clone(), None).await.unwrap();
    assert!(matches!(
        engine.create_disk("mock-main", request, None).await,
        Err(err) if matches!(*err, EngineError::AlreadyExists { .. })
    ));
}

#[tokio::test]
async fn test_disk_attach_detach_flow_and_validation() {
    let (engine, _) = test_engine();
    let (vpc, subnet) = network_fixture(&engine).await;
    let vm = vm_fixture(&engine, "vm-01", &vpc, &subnet).await;

    // out-of-range size never reaches the backend
    assert!(matches!(
        engine
            .create_disk(
                "mock-main",
                DiskRequest {
                    iid: Iid::from_name("disk-xx"),
                    disk_size_gb: 0,
                    ..DiskRequest::default()
                },
                None,
            )
            .await,
        Err(err) if matches!(*err, EngineError::Validation { .. })
    ));

    let disk = engine
        .create_disk(
            "mock-main",
            DiskRequest {
                iid: Iid::from_name("disk-01"),
                disk_size_gb: 100,
                ..DiskRequest::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(disk.iid.name_id, "disk-01");

    let attached = engine.attach_disk("mock-main", &disk.iid, &vm).await.unwrap();
    assert_eq!(attached.owner_vm.as_ref().map(|vm| vm.name_id.as_str()), Some("vm-01"));

    // deleting an attached disk is refused
    assert!(matches!(
        engine.delete_disk("mock-main", &disk.iid).await,
        Err(err) if matches!(*err, EngineError::Validation { .. })
    ));

    // shrinking is refused
    assert!(matches!(
        engine.change_disk_size("mock-main", &disk.iid, 50).await,
        Err(err) if matches!(*err, EngineError::Validation { .. })
    ));

    engine.detach_disk("mock-main", &disk.iid, &vm).await.unwrap();
    engine.change_disk_size("mock-main", &disk.iid, 200).await.unwrap();
    engine.delete_disk("mock-main", &disk.iid).await.unwrap();
}

#[tokio::test]
async fn test_vpc_composite_create_and_cascade_delete() {
    let (engine, _) = test_engine();

    let vpc = engine
        .create_vpc(
            "mock-main",
            VpcRequest {
                iid: Iid::from_name("vpc-01"),
                ipv4_cidr: "10.0.0.0/16".to_string(),
                subnets: vec![
                    SubnetRequest {
                        iid: Iid::from_name("subnet-a"),
                        zone: "zone-a".to_string(),
                        ipv4_cidr: "10.0.1.0/24".to_string(),
                        tags: vec![],
                    },
                    SubnetRequest {
                        iid: Iid::from_name("subnet-b"),
                        zone: "zone-a".to_string(),
                        ipv4_cidr: "10.0.2.0/24".to_string(),
                        tags: vec![],
                    },
                ],
                tags: vec![],
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(vpc.subnets.len(), 2);
    assert_eq!(vpc.subnets[0].iid.name_id, "subnet-a");

    let added = engine
        .add_subnet(
            "mock-main",
            &vpc.iid,
            SubnetRequest {
                iid: Iid::from_name("subnet-c"),
                zone: "zone-a".to_string(),
                ipv4_cidr: "10.0.3.0/24".to_string(),
                tags: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(added.iid.name_id, "subnet-c");

    engine
        .remove_subnet("mock-main", &vpc.iid, &Iid::from_name("subnet-b"))
        .await
        .unwrap();
    assert_eq!(engine.get_vpc("mock-main", &vpc.iid).await.unwrap().subnets.len(), 2);

    // cascade: subnets first, then the shell
    engine.delete_vpc("mock-main", &vpc.iid).await.unwrap();
    assert!(engine.list_vpc("mock-main").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cluster_node_group_failure_rolls_back_control_plane() {
    let (engine, _) = test_engine();
    let (vpc, subnet) = network_fixture(&engine).await;

    let request = ClusterRequest {
        iid: Iid::from_name("k8s-01"),
        version: "1.31".to_string(),
        network: ClusterNetwork {
            vpc_iid: vpc.clone(),
            subnet_iids: vec![subnet.clone()],
            security_group_iids: vec![],
        },
        node_groups: vec![NodeGroupRequest {
            iid: Iid::from_name("ng-01"),
            vm_spec_name: "mock.medium".to_string(),
            desired_node_size: 2,
            min_node_size: 1,
            max_node_size: 3,
            ..NodeGroupRequest::default()
        }],
        tags: vec![],
    };

    let err = engine.create_cluster("mock-broken-ng", request.clone(), None).await.unwrap_err();
    assert!(matches!(*err, EngineError::Provider { ref operation, .. } if operation == "add_node_group"));
    assert!(engine.list_cluster("mock-main").await.unwrap().is_empty());

    // the same request succeeds on a healthy connection
    let info = engine.create_cluster("mock-main", request, None).await.unwrap();
    assert_eq!(info.iid.name_id, "k8s-01");
    assert_eq!(info.node_groups.len(), 1);
    assert_eq!(info.node_groups[0].nodes.len(), 2);

    let scaled = engine
        .change_node_group_scaling("mock-main", &info.iid, &Iid::from_name("ng-01"), 3, 1, 5)
        .await;
    // auto scaling is off by default on the request above
    assert!(matches!(scaled, Err(err) if matches!(*err, EngineError::Validation { .. })));
    engine
        .set_node_group_auto_scaling("mock-main", &info.iid, &Iid::from_name("ng-01"), true)
        .await
        .unwrap();
    let scaled = engine
        .change_node_group_scaling("mock-main", &info.iid, &Iid::from_name("ng-01"), 3, 1, 5)
        .await
        .unwrap();
    assert_eq!(scaled.desired_node_size, 3);

    let upgraded = engine
        .upgrade_cluster("mock-main", &info.iid, "1.32", None)
        .await
        .unwrap();
    assert_eq!(upgraded.version, "1.32");

    engine.delete_cluster("mock-main", &info.iid).await.unwrap();
    assert!(engine.list_cluster("mock-main").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_system_access_subnet_failure_rolls_back() {
    let (engine, _) = test_engine();
    let (vpc, subnet) = network_fixture(&engine).await;

    let request = FileSystemRequest {
        iid: Iid::from_name("fs-01"),
        vpc_iid: vpc.clone(),
        access_subnet_iids: vec![subnet.clone()],
        capacity_gb: -1,
        ..FileSystemRequest::default()
    };

    let err = engine
        .create_file_system("mock-broken-fs", request.clone(), None)
        .await
        .unwrap_err();
    assert!(matches!(*err, EngineError::Provider { ref operation, .. } if operation == "add_access_subnet"));
    assert!(engine.list_file_system("mock-main").await.unwrap().is_empty());

    let info = engine.create_file_system("mock-main", request, None).await.unwrap();
    assert_eq!(info.iid.name_id, "fs-01");
    assert_eq!(info.mount_targets.len(), 1);
    assert_eq!(info.capacity_gb, 1024);

    engine.delete_file_system("mock-main", &info.iid).await.unwrap();
    assert!(engine.list_file_system("mock-main").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_snapshot_and_key_pair_flows() {
    let (engine, _) = test_engine();
    let (vpc, subnet) = network_fixture(&engine).await;
    let vm = vm_fixture(&engine, "vm-01", &vpc, &subnet).await;

    let image = engine
        .snapshot_vm(
            "mock-main",
            MyImageRequest {
                iid: Iid::from_name("img-01"),
                source_vm_iid: vm.clone(),
                tags: vec![],
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(image.iid.name_id, "img-01");
    assert_eq!(image.source_vm_iid.name_id, "vm-01");
    engine.delete_my_image("mock-main", &image.iid).await.unwrap();

    let key = engine
        .create_key_pair(
            "mock-main",
            KeyPairRequest {
                iid: Iid::from_name("key-01"),
                tags: vec![],
            },
        )
        .await
        .unwrap();
    assert!(!key.private_key.is_empty());

    // private material is never listed again
    let listed = engine.get_key_pair("mock-main", &Iid::from_name("key-01")).await.unwrap();
    assert!(listed.private_key.is_empty());
    engine.delete_key_pair("mock-main", &key.iid).await.unwrap();
}

#[tokio::test]
async fn test_catalog_reads() {
    let (engine, _) = test_engine();

    let images = engine.list_image("mock-main").await.unwrap();
    assert!(images.iter().any(|image| image.iid.name_id == "ubuntu-22.04"));

    let specs = engine.list_vm_spec("mock-main").await.unwrap();
    assert!(specs.iter().any(|spec| spec.name == "mock.small"));
    assert_eq!(engine.get_vm_spec("mock-main", "mock.large").await.unwrap().vcpu_count, 8);
    assert!(matches!(
        engine.get_vm_spec("mock-main", "mock.huge").await,
        Err(err) if matches!(*err, EngineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_unknown_connection_surfaces_typed_error() {
    let (engine, _) = test_engine();
    assert!(matches!(
        engine.list_vm("mock-unknown").await,
        Err(err) if matches!(*err, EngineError::UnknownConnection { .. })
    ));
}

struct PanickingLogger;

impl CallLogger for PanickingLogger {
    fn log(&self, _record: &CallRecord) {
        panic!("telemetry sink blew up");
    }
    fn clone_dyn(&self) -> Box<dyn CallLogger> {
        Box::new(PanickingLogger)
    }
}

#[tokio::test]
async fn test_telemetry_failure_never_changes_the_wrapped_result() {
    // setup: one engine whose sink panics, one whose sink writes to an
    // unwritable path
    let driver = Arc::new(MockDriver::new());
    let catalog = Arc::new(StaticCatalog::new().with_connection("mock-main", connection_config(vec![])));
    let panicking = Engine::new(
        ConnectionManager::new(DriverRegistry::new().register(driver.clone()), catalog.clone()),
        EngineConfig {
            budgets: zero_interval_budgets(),
            default_deadline: None,
        },
        Box::new(PanickingLogger),
    );
    let disk_full = Engine::new(
        ConnectionManager::new(DriverRegistry::new().register(driver.clone()), catalog),
        EngineConfig {
            budgets: zero_interval_budgets(),
            default_deadline: None,
        },
        Box::new(FileCallLogger::new(
            "stratus",
            RotatingFileWriter::new(
                std::path::Path::new("/proc/stratus-does-not-exist/call.log"),
                1024,
                1,
                Duration::from_secs(3600),
            ),
        )),
    );

    // execute & verify: both engines behave exactly like a silent one
    let key = panicking
        .create_key_pair(
            "mock-main",
            KeyPairRequest {
                iid: Iid::from_name("key-01"),
                tags: vec![],
            },
        )
        .await
        .unwrap();
    assert!(!key.private_key.is_empty());

    let images = disk_full.list_image("mock-main").await.unwrap();
    assert!(!images.is_empty());

    // and errors keep their shape too
    assert!(matches!(
        panicking.get_key_pair("mock-main", &Iid::from_name("key-09")).await,
        Err(err) if matches!(*err, EngineError::NotFound { .. })
    ));
}
