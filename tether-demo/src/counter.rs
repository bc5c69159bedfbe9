//! The counter window.

use std::time::Duration;

use tether_host::{
    ArgReader, CallArgs, Context, HeadlessToolkit, Interface, InterfaceSpec, InvokeError,
    MethodTable, Value,
};

/// Label showing the current count.
pub const COUNT_LABEL: &str = "count";

/// Free-form text label.
pub const TEXT_LABEL: &str = "text";

/// A window with a count label, a text label, and a button.
///
/// Pressing the button emits `increment` with the new count; the controller
/// decides what the label shows.
#[derive(Debug)]
pub struct CounterGui {
    count: i64,
}

impl InterfaceSpec for CounterGui {
    const NAME: &'static str = "counter";
    const METHODS: &'static [&'static str] = &[
        "set_text",
        "report_text",
        "update_label",
        "report_label",
        "press",
        "press_later",
        "echo",
        "emit_sequence",
        "emit_burst",
        "set_title",
        "report_title",
        "quit",
    ];
}

type Ctx<'a> = Context<'a, HeadlessToolkit>;

impl Interface for CounterGui {
    type Toolkit = HeadlessToolkit;

    /// Arguments: optional window title, keyword `start` for the initial
    /// count.
    fn build(ctx: &mut Ctx<'_>, args: CallArgs) -> Result<Self, InvokeError> {
        let args = ArgReader::signature(args, 0, 1, &["start"])?;
        let title = args
            .opt::<String>(0)?
            .unwrap_or_else(|| "Counter".to_string());
        let start = args.keyword::<i64>("start")?.unwrap_or(0);

        let root = ctx.root();
        root.set_title(title);
        root.set_label(COUNT_LABEL, start.to_string());
        root.set_label(TEXT_LABEL, "");

        Ok(Self { count: start })
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .method1("set_text", |_: &mut Self, ctx, text: String| {
                ctx.root().set_label(TEXT_LABEL, text);
                Ok(())
            })
            .method0("report_text", |_: &mut Self, ctx| {
                let text = ctx.root().label(TEXT_LABEL).unwrap_or_default().to_string();
                Ok(ctx.emit("text", text)?)
            })
            .method1("update_label", |_: &mut Self, ctx, count: i64| {
                ctx.root().set_label(COUNT_LABEL, count.to_string());
                Ok(())
            })
            .method0("report_label", |_: &mut Self, ctx| {
                let label = ctx.root().label(COUNT_LABEL).unwrap_or_default().to_string();
                Ok(ctx.emit("label", label)?)
            })
            .method0("press", |gui: &mut Self, ctx| {
                gui.count += 1;
                Ok(ctx.emit("increment", gui.count)?)
            })
            .method1("press_later", |gui: &mut Self, ctx, delay_ms: u64| {
                // The press lands on a later tick, as a real click would.
                gui.count += 1;
                let count = gui.count;
                let emitter = ctx.emitter();
                ctx.root().after(Duration::from_millis(delay_ms), move |_| {
                    let _ = emitter.emit("increment", count);
                });
                Ok(())
            })
            .method1("echo", |_: &mut Self, ctx, value: Value| {
                Ok(ctx.emit("echo", value)?)
            })
            .method1("emit_sequence", |_: &mut Self, ctx, values: Vec<Value>| {
                for value in values {
                    ctx.emit("clicked", value)?;
                }
                Ok(())
            })
            .method1("emit_burst", |_: &mut Self, ctx, count: u64| {
                for i in 0..count {
                    ctx.emit("tick", i)?;
                }
                Ok(())
            })
            .method1("set_title", |_: &mut Self, ctx, title: String| {
                ctx.root().set_title(title);
                Ok(())
            })
            .method0("report_title", |_: &mut Self, ctx| {
                let title = ctx.root().title().to_string();
                Ok(ctx.emit("title", title)?)
            })
            .method0("quit", |_: &mut Self, ctx| {
                ctx.root().close();
                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_declared_method_is_implemented() {
        let table = CounterGui::methods();
        assert!(table.missing().is_empty());
        assert_eq!(table.len(), CounterGui::METHODS.len());
    }
}
