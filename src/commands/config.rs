// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::FairlockConfig;
use crate::error::Result;
use crate::locking::timeout::LockTimeoutResolution;
use serde::Serialize;

#[derive(Serialize)]
struct EffectiveConfig<'a> {
    #[serde(flatten)]
    config: &'a FairlockConfig,
    effective_timeout: String,
    timeout_source: String,
}

pub struct ConfigCommand<'a> {
    config: &'a FairlockConfig,
}

impl<'a> ConfigCommand<'a> {
    pub fn new(config: &'a FairlockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(&self, timeout: LockTimeoutResolution) -> Result<()> {
        println!("{}", self.render(timeout)?);
        Ok(())
    }

    fn render(&self, timeout: LockTimeoutResolution) -> Result<String> {
        let output = EffectiveConfig {
            config: self.config,
            effective_timeout: timeout.value.to_string(),
            timeout_source: format!("{:?}", timeout.source).to_lowercase(),
        };
        Ok(serde_json::to_string_pretty(&output)?)
    }
}
