//! 协调服务节点路径
//!
//! 定义节点命名空间 `/{root}/{app}_{version}_{env}/{file|item}/{key}`
//! 以及本实例的标识 `/{ip}_{port}_{token}`

use crate::error::CoordinationError;
use crate::fetch::EntryKind;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// 实例标识中使用的固定端口
pub const INSTANCE_PORT: u16 = 8080;

/// 随机令牌字节数
const TOKEN_BYTES: usize = 48;

/// 某个应用、版本、环境下的节点命名空间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    root: String,
    app: String,
    version: String,
    env: String,
}

impl Namespace {
    pub fn new(
        root: impl Into<String>,
        app: impl Into<String>,
        version: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            app: app.into(),
            version: version.into(),
            env: env.into(),
        }
    }

    /// `/{root}`
    pub fn root_path(&self) -> String {
        format!("/{}", self.root)
    }

    /// `/{root}/{app}_{version}_{env}`
    pub fn namespace_path(&self) -> String {
        format!("/{}/{}_{}_{}", self.root, self.app, self.version, self.env)
    }

    /// `/{root}/{app}_{version}_{env}/{kind}`
    pub fn kind_path(&self, kind: EntryKind) -> Result<String, CoordinationError> {
        Ok(format!("{}/{}", self.namespace_path(), kind_segment(kind)?))
    }

    /// 配置项的定义节点
    pub fn definition_path(&self, key: &str, kind: EntryKind) -> Result<String, CoordinationError> {
        Ok(format!("{}/{}", self.kind_path(kind)?, key))
    }
}

/// 配置类型对应的路径段
pub fn kind_segment(kind: EntryKind) -> Result<&'static str, CoordinationError> {
    match kind {
        EntryKind::File => Ok("file"),
        EntryKind::Item => Ok("item"),
        EntryKind::Unknown(code) => Err(CoordinationError::UnknownKind(code)),
    }
}

/// 生成随机令牌：48 字节随机数经 base64 编码后取 SHA-256 十六进制摘要
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = URL_SAFE.encode(bytes);
    format!("{:x}", Sha256::digest(encoded.as_bytes()))
}

/// 本机对外的 IPv4 地址
///
/// 通过未发送数据的 UDP 套接字确定出口地址，无可用路由时退回回环地址。
pub fn local_ipv4() -> Result<Ipv4Addr, CoordinationError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    if socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).is_err() {
        return Ok(Ipv4Addr::LOCALHOST);
    }

    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        _ => Ok(Ipv4Addr::LOCALHOST),
    }
}

/// 本实例的节点后缀 `/{ip}_{port}_{token}`
pub fn instance_suffix(ip: Ipv4Addr, token: &str) -> String {
    format!("/{}_{}_{}", ip, INSTANCE_PORT, token)
}
