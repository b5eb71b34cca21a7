use log::info;

use crate::{
    command::CommandToken,
    error::OutputError,
    response::ResponseTemplate,
    types::{DeviceAddress, OutputState},
};

pub trait BinaryOutput {
    fn state(&self) -> OutputState;
    fn set(&mut self, state: OutputState) -> Result<(), OutputError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryOutput {
    state: OutputState,
}

impl BinaryOutput for MemoryOutput {
    fn state(&self) -> OutputState {
        self.state
    }

    fn set(&mut self, state: OutputState) -> Result<(), OutputError> {
        self.state = state;
        Ok(())
    }
}

pub struct ActionDispatcher<O> {
    address: DeviceAddress,
    output: O,
}

impl<O: BinaryOutput> ActionDispatcher<O> {
    pub fn new(address: DeviceAddress, output: O) -> Self {
        Self { address, output }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn output_state(&self) -> OutputState {
        self.output.state()
    }

    pub fn dispatch(&mut self, token: CommandToken) -> Result<ResponseTemplate, OutputError> {
        match token {
            CommandToken::Index => Ok(ResponseTemplate::ControlPage(self.address)),
            CommandToken::TurnOn => {
                info!("turning on the light");
                self.output.set(OutputState::On)?;
                Ok(ResponseTemplate::OnAck)
            }
            CommandToken::TurnOff => {
                info!("turning off the light");
                self.output.set(OutputState::Off)?;
                Ok(ResponseTemplate::OffAck)
            }
        }
    }
}
