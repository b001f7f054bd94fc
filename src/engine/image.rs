use function_name::named;

use crate::call_log;
use crate::engine::Engine;
use crate::errors::EngineError;
use crate::iid::Iid;
use crate::resources::ResourceType;
use crate::resources::image::ImageInfo;

impl Engine {
    /// Public image catalogs are read-only and backend-named; identities
    /// pass through untouched.
    #[named]
    pub async fn list_image(&self, connection_name: &str) -> Result<Vec<ImageInfo>, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.image_handler()?;
        let record = self.record(&bundle, ResourceType::Image, "", function_name!());
        let started = call_log::start();
        let result = handler.list_image().await.map_err(Box::new);
        self.emit(record, started, &result);
        result
    }

    #[named]
    pub async fn get_image(&self, connection_name: &str, image: &Iid) -> Result<ImageInfo, Box<EngineError>> {
        let bundle = self.bundle(connection_name)?;
        let handler = bundle.connection.image_handler()?;
        let record = self.record(&bundle, ResourceType::Image, &image.name_id, function_name!());
        let started = call_log::start();
        let result = async {
            image.validate()?;
            handler.get_image(image).await
        }
        .await
        .map_err(Box::new);
        self.emit(record, started, &result);
        result
    }
}
