//! Template rendering for blueprint arguments and artifacts
//!
//! Templates use minijinja syntax against [`TemplateParams`], e.g.
//! `{{ Object.metadata.name }}` or `{{ Secrets.creds.password | b64enc }}`.
//! Undefined lookups are errors.

use crate::error::{EngineError, Result};
use base64::Engine as _;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use skiff_crd::{Artifact, ObjectReference, Value, ValueMap};
use skiff_functions::TemplateParams;
use std::collections::BTreeMap;

/// Renders strings against one set of template parameters
pub struct Renderer {
    env: Environment<'static>,
    ctx: minijinja::Value,
}

impl Renderer {
    pub fn new(params: &TemplateParams) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("b64enc", b64enc);
        env.add_filter("b64dec", b64dec);
        Self {
            env,
            ctx: minijinja::Value::from_serialize(params),
        }
    }

    /// Render one string; strings without template markers pass through
    pub fn render_str(&self, source: &str) -> Result<String> {
        if !is_template(source) {
            return Ok(source.to_string());
        }
        self.env
            .render_str(source, &self.ctx)
            .map_err(|e| EngineError::Render(format!("'{}': {}", source, e)))
    }

    /// Render every string inside a value, mapping keys included
    pub fn render_value(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::String(s) => Value::String(self.render_str(s)?),
            Value::Sequence(items) => Value::Sequence(
                items
                    .iter()
                    .map(|item| self.render_value(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Mapping(map) => Value::Mapping(self.render_map(map)?),
            other => other.clone(),
        })
    }

    pub fn render_map(&self, map: &ValueMap) -> Result<ValueMap> {
        map.iter()
            .map(|(k, v)| Ok((self.render_str(k)?, self.render_value(v)?)))
            .collect()
    }

    fn render_reference(&self, reference: &ObjectReference) -> Result<ObjectReference> {
        Ok(ObjectReference {
            api_version: self.render_str(&reference.api_version)?,
            group: self.render_str(&reference.group)?,
            resource: self.render_str(&reference.resource)?,
            kind: self.render_str(&reference.kind)?,
            name: self.render_str(&reference.name)?,
            namespace: self.render_str(&reference.namespace)?,
        })
    }

    fn render_artifact(&self, artifact: &Artifact) -> Result<Artifact> {
        let key_value = artifact
            .key_value
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.render_str(v)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let snapshot = artifact
            .snapshot
            .as_deref()
            .map(|s| self.render_str(s))
            .transpose()?;
        Ok(Artifact { key_value, snapshot })
    }
}

fn is_template(source: &str) -> bool {
    source.contains("{{") || source.contains("{%")
}

fn b64enc(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn b64dec(value: String) -> std::result::Result<String, minijinja::Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    String::from_utf8(bytes)
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Render a phase's argument templates
pub fn render_args(args: &ValueMap, params: &TemplateParams) -> Result<ValueMap> {
    Renderer::new(params).render_map(args)
}

/// Render the object references attached to a phase
pub fn render_object_refs(
    objects: &BTreeMap<String, ObjectReference>,
    params: &TemplateParams,
) -> Result<BTreeMap<String, ObjectReference>> {
    let renderer = Renderer::new(params);
    objects
        .iter()
        .map(|(k, r)| Ok((k.clone(), renderer.render_reference(r)?)))
        .collect()
}

/// Render an action's declared output artifacts
pub fn render_artifacts(
    artifacts: &BTreeMap<String, Artifact>,
    params: &TemplateParams,
) -> Result<BTreeMap<String, Artifact>> {
    let renderer = Renderer::new(params);
    artifacts
        .iter()
        .map(|(k, a)| Ok((k.clone(), renderer.render_artifact(a)?)))
        .collect()
}
