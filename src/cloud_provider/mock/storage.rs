use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::cloud_provider::mock::{MockBehavior, MockRegion};
use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::ResourceType;
use crate::resources::disk::{DiskHandler, DiskInfo, DiskRequest, DiskStatus};
use crate::resources::file_system::{
    FileSystemHandler, FileSystemInfo, FileSystemRequest, FileSystemStatus, MountTargetInfo,
};
use crate::resources::vm::VmStatus;

pub struct MockDisk {
    pub info: DiskInfo,
    pub countdown: u32,
}

impl MockDisk {
    fn tick(&mut self) -> DiskStatus {
        if self.info.status == DiskStatus::Creating {
            if self.countdown == 0 {
                self.info.status = DiskStatus::Available;
            } else {
                self.countdown -= 1;
            }
        }
        self.info.status
    }
}

pub struct MockDiskHandler {
    region_state: Arc<MockRegion>,
    behavior: Arc<MockBehavior>,
    region: crate::resources::RegionInfo,
}

impl MockDiskHandler {
    pub fn new(region_state: Arc<MockRegion>, behavior: Arc<MockBehavior>, region: crate::resources::RegionInfo) -> Self {
        MockDiskHandler {
            region_state,
            behavior,
            region,
        }
    }
}

fn disk_not_found(iid: &Iid) -> EngineError {
    EngineError::new_not_found(ResourceType::Disk, &iid.to_string())
}

fn find_disk_id(disks: &HashMap<String, MockDisk>, iid: &Iid) -> Option<String> {
    if !iid.system_id.is_empty() {
        return disks.contains_key(&iid.system_id).then(|| iid.system_id.clone());
    }
    disks
        .iter()
        .find(|(_, disk)| disk.info.iid.name_id == iid.name_id)
        .map(|(id, _)| id.clone())
}

#[async_trait]
impl DiskHandler for MockDiskHandler {
    async fn create_disk(&self, request: DiskRequest) -> Result<DiskInfo, EngineError> {
        self.behavior
            .fail_if_armed("create_disk", ResourceType::Disk, &request.iid.name_id)?;
        let system_id = self.region_state.next_system_id("vol");
        let info = DiskInfo {
            iid: Iid::new(&request.iid.name_id, &system_id),
            zone: if request.zone.is_empty() {
                self.region.zone.clone()
            } else {
                request.zone.clone()
            },
            disk_type: if request.disk_type.is_empty() || request.disk_type == "default" {
                "SSD".to_string()
            } else {
                request.disk_type.clone()
            },
            disk_size_gb: request.disk_size_gb,
            status: DiskStatus::Creating,
            owner_vm: None,
            created_at: Utc::now(),
            tags: request.tags.clone(),
            key_values: vec![],
        };
        let mut disks = MockRegion::lock(&self.region_state.disks, ResourceType::Disk)?;
        disks.insert(
            system_id,
            MockDisk {
                info: info.clone(),
                countdown: self.behavior.settle_after_polls,
            },
        );
        Ok(info)
    }

    async fn list_disk(&self) -> Result<Vec<DiskInfo>, EngineError> {
        let mut disks = MockRegion::lock(&self.region_state.disks, ResourceType::Disk)?;
        Ok(disks
            .values_mut()
            .map(|disk| {
                disk.tick();
                disk.info.clone()
            })
            .collect())
    }

    async fn get_disk(&self, iid: &Iid) -> Result<DiskInfo, EngineError> {
        let mut disks = MockRegion::lock(&self.region_state.disks, ResourceType::Disk)?;
        let system_id = find_disk_id(&disks, iid).ok_or_else(|| disk_not_found(iid))?;
        let disk = disks.get_mut(&system_id).ok_or_else(|| disk_not_found(iid))?;
        disk.tick();
        Ok(disk.info.clone())
    }

    async fn change_disk_size(&self, iid: &Iid, size_gb: i64) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("change_disk_size", ResourceType::Disk, &iid.name_id)?;
        let mut disks = MockRegion::lock(&self.region_state.disks, ResourceType::Disk)?;
        let system_id = find_disk_id(&disks, iid).ok_or_else(|| disk_not_found(iid))?;
        let disk = disks.get_mut(&system_id).ok_or_else(|| disk_not_found(iid))?;
        disk.info.disk_size_gb = size_gb;
        Ok(())
    }

    async fn delete_disk(&self, iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("delete_disk", ResourceType::Disk, &iid.name_id)?;
        let mut disks = MockRegion::lock(&self.region_state.disks, ResourceType::Disk)?;
        let system_id = find_disk_id(&disks, iid).ok_or_else(|| disk_not_found(iid))?;
        disks.remove(&system_id);
        Ok(())
    }

    async fn attach_disk(&self, iid: &Iid, vm_iid: &Iid) -> Result<DiskInfo, EngineError> {
        self.behavior
            .fail_if_armed("attach_disk", ResourceType::Disk, &iid.name_id)?;
        {
            let vms = MockRegion::lock(&self.region_state.vms, ResourceType::Vm)?;
            let running = vms
                .values()
                .find(|vm| vm.info.iid.system_id == vm_iid.system_id || vm.info.iid.name_id == vm_iid.name_id)
                .map(|vm| vm.status == VmStatus::Running)
                .ok_or_else(|| EngineError::new_not_found(ResourceType::Vm, &vm_iid.to_string()))?;
            if !running {
                return Err(EngineError::new_validation(format!(
                    "VM {vm_iid} must be Running to attach a disk"
                )));
            }
        }
        let mut disks = MockRegion::lock(&self.region_state.disks, ResourceType::Disk)?;
        let system_id = find_disk_id(&disks, iid).ok_or_else(|| disk_not_found(iid))?;
        let disk = disks.get_mut(&system_id).ok_or_else(|| disk_not_found(iid))?;
        if disk.info.status != DiskStatus::Available {
            return Err(EngineError::new_validation(format!(
                "disk {} is {}, not Available",
                iid, disk.info.status
            )));
        }
        disk.info.status = DiskStatus::Attached;
        disk.info.owner_vm = Some(vm_iid.clone());
        Ok(disk.info.clone())
    }

    async fn detach_disk(&self, iid: &Iid, vm_iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("detach_disk", ResourceType::Disk, &iid.name_id)?;
        let mut disks = MockRegion::lock(&self.region_state.disks, ResourceType::Disk)?;
        let system_id = find_disk_id(&disks, iid).ok_or_else(|| disk_not_found(iid))?;
        let disk = disks.get_mut(&system_id).ok_or_else(|| disk_not_found(iid))?;
        match &disk.info.owner_vm {
            Some(owner) if owner.system_id == vm_iid.system_id || owner.name_id == vm_iid.name_id => {
                disk.info.status = DiskStatus::Available;
                disk.info.owner_vm = None;
                Ok(())
            }
            _ => Err(EngineError::new_validation(format!(
                "disk {iid} is not attached to VM {vm_iid}"
            ))),
        }
    }
}

//================ FileSystem

pub struct MockFileSystem {
    pub info: FileSystemInfo,
    pub countdown: u32,
}

impl MockFileSystem {
    fn tick(&mut self) -> FileSystemStatus {
        if self.info.status == FileSystemStatus::Creating {
            if self.countdown == 0 {
                self.info.status = FileSystemStatus::Available;
            } else {
                self.countdown -= 1;
            }
        }
        self.info.status
    }
}

pub struct MockFileSystemHandler {
    region_state: Arc<MockRegion>,
    behavior: Arc<MockBehavior>,
}

impl MockFileSystemHandler {
    pub fn new(region_state: Arc<MockRegion>, behavior: Arc<MockBehavior>) -> Self {
        MockFileSystemHandler { region_state, behavior }
    }
}

fn fs_not_found(iid: &Iid) -> EngineError {
    EngineError::new_not_found(ResourceType::FileSystem, &iid.to_string())
}

fn find_fs_id(table: &HashMap<String, MockFileSystem>, iid: &Iid) -> Option<String> {
    if !iid.system_id.is_empty() {
        return table.contains_key(&iid.system_id).then(|| iid.system_id.clone());
    }
    table
        .iter()
        .find(|(_, fs)| fs.info.iid.name_id == iid.name_id)
        .map(|(id, _)| id.clone())
}

#[async_trait]
impl FileSystemHandler for MockFileSystemHandler {
    async fn create_file_system(&self, request: &FileSystemRequest) -> Result<FileSystemInfo, EngineError> {
        self.behavior
            .fail_if_armed("create_file_system", ResourceType::FileSystem, &request.iid.name_id)?;
        let system_id = self.region_state.next_system_id("fs");
        let info = FileSystemInfo {
            iid: Iid::new(&request.iid.name_id, &system_id),
            vpc_iid: request.vpc_iid.clone(),
            access_subnet_iids: vec![],
            nfs_version: if request.nfs_version.is_empty() {
                "4.1".to_string()
            } else {
                request.nfs_version.clone()
            },
            capacity_gb: if request.capacity_gb < 0 { 1024 } else { request.capacity_gb },
            used_size_gb: 0,
            mount_targets: vec![],
            status: FileSystemStatus::Creating,
            created_at: Utc::now(),
            tags: request.tags.clone(),
            key_values: vec![],
        };
        let mut table = MockRegion::lock(&self.region_state.file_systems, ResourceType::FileSystem)?;
        table.insert(
            system_id,
            MockFileSystem {
                info: info.clone(),
                countdown: self.behavior.settle_after_polls,
            },
        );
        Ok(info)
    }

    async fn list_file_system(&self) -> Result<Vec<FileSystemInfo>, EngineError> {
        let mut table = MockRegion::lock(&self.region_state.file_systems, ResourceType::FileSystem)?;
        Ok(table
            .values_mut()
            .map(|fs| {
                fs.tick();
                fs.info.clone()
            })
            .collect())
    }

    async fn get_file_system(&self, iid: &Iid) -> Result<FileSystemInfo, EngineError> {
        let mut table = MockRegion::lock(&self.region_state.file_systems, ResourceType::FileSystem)?;
        let system_id = find_fs_id(&table, iid).ok_or_else(|| fs_not_found(iid))?;
        let fs = table.get_mut(&system_id).ok_or_else(|| fs_not_found(iid))?;
        fs.tick();
        Ok(fs.info.clone())
    }

    async fn get_file_system_status(&self, iid: &Iid) -> Result<FileSystemStatus, EngineError> {
        let mut table = MockRegion::lock(&self.region_state.file_systems, ResourceType::FileSystem)?;
        let system_id = find_fs_id(&table, iid).ok_or_else(|| fs_not_found(iid))?;
        let fs = table.get_mut(&system_id).ok_or_else(|| fs_not_found(iid))?;
        Ok(fs.tick())
    }

    async fn delete_file_system(&self, iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("delete_file_system", ResourceType::FileSystem, &iid.name_id)?;
        let mut table = MockRegion::lock(&self.region_state.file_systems, ResourceType::FileSystem)?;
        let system_id = find_fs_id(&table, iid).ok_or_else(|| fs_not_found(iid))?;
        table.remove(&system_id);
        Ok(())
    }

    async fn add_access_subnet(&self, iid: &Iid, subnet_iid: &Iid) -> Result<MountTargetInfo, EngineError> {
        self.behavior
            .fail_if_armed("add_access_subnet", ResourceType::FileSystem, &iid.name_id)?;
        let mut table = MockRegion::lock(&self.region_state.file_systems, ResourceType::FileSystem)?;
        let system_id = find_fs_id(&table, iid).ok_or_else(|| fs_not_found(iid))?;
        let fs = table.get_mut(&system_id).ok_or_else(|| fs_not_found(iid))?;
        let endpoint = format!("{}.{}.mock.example:/", fs.info.iid.name_id, subnet_iid.name_id);
        let target = MountTargetInfo {
            subnet_iid: subnet_iid.clone(),
            endpoint: endpoint.clone(),
            mount_command_example: format!("mount -t nfs {endpoint} /mnt"),
            key_values: vec![],
        };
        fs.info.access_subnet_iids.push(subnet_iid.clone());
        fs.info.mount_targets.push(target.clone());
        Ok(target)
    }

    async fn remove_access_subnet(&self, iid: &Iid, subnet_iid: &Iid) -> Result<(), EngineError> {
        self.behavior
            .fail_if_armed("remove_access_subnet", ResourceType::FileSystem, &iid.name_id)?;
        let mut table = MockRegion::lock(&self.region_state.file_systems, ResourceType::FileSystem)?;
        let system_id = find_fs_id(&table, iid).ok_or_else(|| fs_not_found(iid))?;
        let fs = table.get_mut(&system_id).ok_or_else(|| fs_not_found(iid))?;
        let before = fs.info.access_subnet_iids.len();
        fs.info
            .access_subnet_iids
            .retain(|subnet| !(subnet.system_id == subnet_iid.system_id || subnet.name_id == subnet_iid.name_id));
        fs.info
            .mount_targets
            .retain(|target| !(target.subnet_iid.system_id == subnet_iid.system_id || target.subnet_iid.name_id == subnet_iid.name_id));
        if fs.info.access_subnet_iids.len() == before {
            return Err(EngineError::new_not_found(ResourceType::Subnet, &subnet_iid.to_string()));
        }
        Ok(())
    }

    async fn list_access_subnets(&self, iid: &Iid) -> Result<Vec<Iid>, EngineError> {
        let table = MockRegion::lock(&self.region_state.file_systems, ResourceType::FileSystem)?;
        let system_id = find_fs_id(&table, iid).ok_or_else(|| fs_not_found(iid))?;
        Ok(table[&system_id].info.access_subnet_iids.clone())
    }
}
