use crate::media::ScreenshotSigner;
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub signer: ScreenshotSigner,
}
