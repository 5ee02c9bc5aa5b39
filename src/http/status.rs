#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub code_num: u16,
    pub message: &'static str,
}

impl Status {
    pub const CONTINUE: Status = Status {
        code_num: 100,
        message: "Continue",
    };
    pub const OK: Status = Status {
        code_num: 200,
        message: "OK",
    };
    pub const BAD_REQUEST: Status = Status {
        code_num: 400,
        message: "Bad Request",
    };
    pub const NOT_FOUND: Status = Status {
        code_num: 404,
        message: "Not Found",
    };
    pub const URI_TOO_LONG: Status = Status {
        code_num: 414,
        message: "URI Too Long",
    };
    pub const NOT_IMPLEMENTED: Status = Status {
        code_num: 501,
        message: "Not Implemented",
    };
}
