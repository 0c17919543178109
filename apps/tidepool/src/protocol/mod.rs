pub mod wire;

pub use wire::{
    BackendOpts, BackendUpdate, BoundingRect, FrontendUpdate, KeyData, MessageKind, PendingEvent,
    PointerData, RefOperation, RefPosition, RefUpdate, RenderContext, RenderUpdate,
    SessionMessage, StateSync, TransferElem, UpdateType, merge_chunks,
};
