//! Message templates per pipeline verdict, addressed to the person who
//! asked for the slot, so the copy speaks their language.

use slotwatch_core::PipelineResult;

pub fn render(result: PipelineResult, name: &str, url: &str) -> String {
    let headline = match result {
        PipelineResult::SlotAvailable => "✅ Есть слот, беги регистрироваться!",
        PipelineResult::SlotNotAvailable => "🤷 Слотов пока нет, ждем...",
        PipelineResult::NoRescheduleTasks => "🤔 Не нашел слотов для переноса!",
        PipelineResult::MaybeAlreadySigned | PipelineResult::Undefined => {
            "🤔 Возможно, слот уже зарегистрирован?"
        }
    };
    format!("{}\n🆔: {}\n🔗: {}", headline, name, url)
}
