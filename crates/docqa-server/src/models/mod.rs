pub mod dto;

pub use dto::{
    ChatChunk, ChatRequestBody, Citation, ChunkDto, ContentDto, CreateSessionRequest,
    DocumentDto, MessageDto, SessionDto, StreamParams, UploadParams,
};
