use std::fmt::Write as _;

use crate::types::DeviceAddress;

pub const ON_ACK_BODY: &str = "<html><body><h1>Turned on the light</h1></body></html>\r\n";
pub const OFF_ACK_BODY: &str = "<html><body><h1>Turned off the light</h1></body></html>\r\n";

const SERVER_NAME: &str = "esp32";

const CONTROL_PAGE_HEAD: &str = concat!(
    "<!DOCTYPE html>\r\n",
    "<html>\r\n",
    "<head>\r\n",
    "    <title>Control Page</title>\r\n",
    "    <style>\r\n",
    "        .button {\r\n",
    "            display: inline-block;\r\n",
    "            padding: 15px 25px;\r\n",
    "            font-size: 24px;\r\n",
    "            cursor: pointer;\r\n",
    "            text-align: center;\r\n",
    "            text-decoration: none;\r\n",
    "            outline: none;\r\n",
    "            color: #fff;\r\n",
    "            background-color: #4CAF50;\r\n",
    "            border: none;\r\n",
    "            border-radius: 15px;\r\n",
    "            box-shadow: 0 9px #999;\r\n",
    "        }\r\n",
    "        .button:hover {background-color: #3e8e41}\r\n",
    "        .button:active {\r\n",
    "            background-color: #3e8e41;\r\n",
    "            box-shadow: 0 5px #666;\r\n",
    "            transform: translateY(4px);\r\n",
    "        }\r\n",
    "    </style>\r\n",
    "</head>\r\n",
    "<body>\r\n",
);

const CONTROL_PAGE_TAIL: &str = "</body>\r\n</html>\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTemplate {
    ControlPage(DeviceAddress),
    OnAck,
    OffAck,
}

impl ResponseTemplate {
    pub fn body(&self) -> String {
        match self {
            Self::ControlPage(address) => control_page(address),
            Self::OnAck => ON_ACK_BODY.to_string(),
            Self::OffAck => OFF_ACK_BODY.to_string(),
        }
    }

    pub fn render(&self) -> Vec<u8> {
        let body = self.body();
        let mut response = String::with_capacity(body.len() + 128);
        response.push_str("HTTP/1.1 200 OK\r\n");
        let _ = write!(response, "Server: {SERVER_NAME}\r\n");
        response.push_str("Content-Type: text/html\r\n");
        let _ = write!(response, "Content-Length: {}\r\n", body.len());
        response.push_str("Connection: close\r\n\r\n");
        response.push_str(&body);
        response.into_bytes()
    }
}

fn control_page(address: &DeviceAddress) -> String {
    let mut page = String::with_capacity(CONTROL_PAGE_HEAD.len() + CONTROL_PAGE_TAIL.len() + 192);
    page.push_str(CONTROL_PAGE_HEAD);
    let _ = write!(
        page,
        "    <a href=\"http://{address}/turnmeon\" class=\"button\" target=\"_blank\">Turn On</a>\r\n"
    );
    let _ = write!(
        page,
        "    <a href=\"http://{address}/turnmeoff\" class=\"button\" target=\"_blank\">Turn Off</a>\r\n"
    );
    page.push_str(CONTROL_PAGE_TAIL);
    page
}
