use function_name::named;

use crate::call_log;
use crate::engine::Engine;
use crate::errors::EngineError;
use crate::resources::ResourceType;
use crate::resources::vm_spec::VmSpecInfo;

impl Engine {
    #[named]
    pub async fn list_vm_spec(&self, connection_name: &str) -> Result<Vec<VmSpecInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vm_spec_handler()?;
        let record = self.record(&bundle, ResourceType::VmSpec, "", function_name!());
        let started = call_log::start();
        let result = handler.list_vm_spec().await.map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_vm_spec(&self, connection_name: &str, name: &str) -> Result<VmSpecInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.vm_spec_handler()?;
        let record = self.record(&bundle, ResourceType::VmSpec, name, function_name!());
        let started = call_log::start();
        let result = async {
            if name.is_empty() {
                return Err(EngineError::new_validation("vm spec name is empty".to_string()));
            }
            handler.get_vm_spec(name).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}
