mod page;
mod pool;
mod storage;

pub use page::Page;
pub use pool::PagePool;
pub use storage::{FilePageStore, PageId, PageStorage, TwoFileStore, U32Reader};
