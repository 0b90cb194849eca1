//! 协议常量定义

/// 默认端口
pub const DEFAULT_PORT: u16 = 8888;

/// 客户端默认连接的主机
pub const DEFAULT_HOST: &str = "localhost";

/// 服务端监听地址（所有网卡）
pub const BIND_HOST: &str = "0.0.0.0";

/// 单行最大长度（字节，不含换行符）
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// 行分隔符
pub const LINE_DELIMITER: u8 = b'\n';
