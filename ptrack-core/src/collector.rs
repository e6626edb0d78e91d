//! Preset collection: snapshot the environment into a [`PresetRecord`].

use crate::environment::EnvironmentState;
use crate::record::PresetRecord;

/// Treat blank names as absent.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|name| !name.trim().is_empty())
}

/// Build a record from the current environment.
///
/// Template fields are read only in templated mode. `forced_model` is set
/// whenever a non-empty override is passed, regardless of mode. Returns
/// `None` when nothing could be collected; callers treat that as "nothing
/// to save".
pub fn collect<E>(environment: &E, forced_model: Option<&str>) -> Option<PresetRecord>
where
    E: EnvironmentState + ?Sized,
{
    let mut record = PresetRecord {
        gen_preset: non_blank(environment.active_preset_name()),
        ..PresetRecord::default()
    };

    if environment.is_templated_mode() {
        record.ctx_tpl = non_blank(environment.active_context_template_name());
        record.ins_tpl = non_blank(environment.active_instruct_template_name());
        record.sys_ppt = non_blank(environment.active_system_prompt_name());
    }

    record.forced_model = forced_model
        .filter(|model| !model.is_empty())
        .map(str::to_string);

    if record.is_empty() {
        None
    } else {
        Some(record)
    }
}
