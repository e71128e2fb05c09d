// crates/opensafety-rs/src/sod/constants.rs
//! Reserved SOD indices and sub-indices the stack relies on.

// --- Life guarding (0x100C) ---
pub const IDX_LIFE_GUARDING: u16 = 0x100C;
pub const SUBIDX_GUARD_TIME: u8 = 0x01;
pub const SUBIDX_LIFE_TIME_FACTOR: u8 = 0x02;

// --- Pre-operational refresh signal (0x100D / 0x100E) ---
pub const IDX_PRE_OP_SIGNAL: u16 = 0x100D;
pub const IDX_PRE_OP_RETRIES: u16 = 0x100E;
/// Retry count sentinel meaning "no limit".
pub const K_UNLIMITED_RETRIES: u8 = 0xFF;

// --- Device vendor information (0x1018) ---
pub const IDX_DEVICE_VEN_ID: u16 = 0x1018;
pub const SUBIDX_VENDOR_ID: u8 = 0x01;
pub const SUBIDX_PRODUCT_CODE: u8 = 0x02;
pub const SUBIDX_REVISION_NUMBER: u8 = 0x03;
pub const SUBIDX_SERIAL_NUMBER: u8 = 0x04;
pub const SUBIDX_FIRMWARE_CHKSUM: u8 = 0x05;
pub const SUBIDX_PARAM_CHKSUM: u8 = 0x06;
pub const SUBIDX_PARAM_TIMESTAMP: u8 = 0x07;

// --- Unique device id (0x1019) ---
pub const IDX_UDID: u16 = 0x1019;

// --- Parameter download target (0x101A) ---
pub const IDX_PARAM_DOWNLOAD: u16 = 0x101A;

// --- Common communication parameters (0x1200) ---
pub const IDX_COMMON_COM_PARAM: u16 = 0x1200;
pub const SUBIDX_SDN: u8 = 0x01;
pub const SUBIDX_SADR_SCM: u8 = 0x02;
pub const SUBIDX_CT_BASE: u8 = 0x03;
pub const SUBIDX_UDID_SCM: u8 = 0x04;

// --- SSDO communication parameters (0x1201) ---
pub const IDX_SSDO_COM_PARAM: u16 = 0x1201;
pub const SUBIDX_SSDO_TIMEOUT: u8 = 0x01;
pub const SUBIDX_SSDO_RETRIES: u8 = 0x02;

// --- RxSPDO communication parameters (0x1400 .. 0x17FE) ---
pub const IDX_RX_SPDO_COM_BASE: u16 = 0x1400;
pub const SUBIDX_RX_SADR: u8 = 0x01;
pub const SUBIDX_RX_SCT: u8 = 0x02;
pub const SUBIDX_RX_MIN_TSYNC_PROP_DELAY: u8 = 0x06;
pub const SUBIDX_RX_MAX_TSYNC_PROP_DELAY: u8 = 0x07;
pub const SUBIDX_RX_MIN_SPDO_PROP_DELAY: u8 = 0x08;
pub const SUBIDX_RX_MAX_SPDO_PROP_DELAY: u8 = 0x09;
pub const SUBIDX_RX_TIME_REQUEST_CYCLE: u8 = 0x0B;
pub const SUBIDX_RX_TX_SPDO_NO: u8 = 0x0C;

// --- RxSPDO mapping parameters (0x1800 .. 0x1BFE) ---
pub const IDX_RX_SPDO_MAPP_BASE: u16 = 0x1800;

// --- TxSPDO communication parameters (0x1C00 .. 0x1FFE) ---
pub const IDX_TX_SPDO_COM_BASE: u16 = 0x1C00;
pub const SUBIDX_TX_SADR: u8 = 0x01;
pub const SUBIDX_TX_REFRESH_PRESCALE: u8 = 0x02;

// --- TxSPDO mapping parameters (0xC000 .. 0xC3FE) ---
pub const IDX_TX_SPDO_MAPP_BASE: u16 = 0xC000;

// --- SCM: SADR-DVI list (0xC400 .. 0xC7FE) ---
pub const IDX_SADR_DVI_BASE: u16 = 0xC400;
pub const SUBIDX_DVI_SADR: u8 = 0x01;
pub const SUBIDX_DVI_VENDOR_ID: u8 = 0x02;
pub const SUBIDX_DVI_PRODUCT_CODE: u8 = 0x03;
pub const SUBIDX_DVI_REVISION_NUMBER: u8 = 0x04;
pub const SUBIDX_DVI_NODE_STATUS: u8 = 0x05;
pub const SUBIDX_DVI_MAX_SSDO_PYLD: u8 = 0x06;
pub const SUBIDX_DVI_PARAM_TIMESTAMP: u8 = 0x07;
pub const SUBIDX_DVI_PARAM_SET: u8 = 0x08;

// --- SCM: additional SADR list (0xC800 .. 0xCBFE) ---
pub const IDX_ADD_SADR_BASE: u16 = 0xC800;

// --- SCM: SADR-UDID list (0xCC00 .. 0xCFFE) ---
pub const IDX_SADR_UDID_BASE: u16 = 0xCC00;
pub const SUBIDX_UDID_LIST_UDID: u8 = 0x01;
