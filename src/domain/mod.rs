//! 领域层
//!
//! - `model`: 连接、节点、广播消息等领域模型
//! - `repository`: 共享存储、广播总线、推送通道等外部协作方接口
//! - `service`: 本地连接表、节点健康、在线状态、消息路由等领域服务

pub mod model;
pub mod repository;
pub mod service;
