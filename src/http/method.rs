use strum::{Display, EnumString};

#[derive(EnumString, Display, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Method {
    #[strum(serialize = "GET")]
    GET,
    #[strum(serialize = "HEAD")]
    HEAD,
    #[strum(serialize = "POST")]
    POST,
}
